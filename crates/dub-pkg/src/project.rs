//! A project: the root package plus its transitively resolved
//! dependencies.
//!
//! The project walks the dependency graph (`reinit`), computes one
//! configuration per reachable package for a target platform
//! (`get_package_configs`), aggregates per-platform build settings for
//! the compiler driver (`add_build_settings`), and drives the version
//! resolver (`upgrade`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

use dub_recipe::settings::{BuildSettings, TargetType};
use dub_recipe::{base_package_name, BuildPlatform, Dependency, Version};

use crate::manager::{ManagerError, PackageManager, PlacementLocation};
use crate::package::{Package, PackageError};
use crate::resolver::{
    self, DependencyProvider, DependencyType, ResolverError, TreeNode, TreeNodes,
};
use crate::selections::{SelectedVersions, SelectionsError, SELECTIONS_FILE};
use crate::supplier::{PackageSupplier, SupplierError};
use crate::vars::{self, VarContext, VarError};

/// Per-project state directory.
pub const DUB_DIR: &str = ".dub";

/// Per-project cache file inside [`DUB_DIR`].
pub const PROJECT_CACHE_FILE: &str = "dub.json";

/// How long a cached upgrade result stays usable.
fn upgrade_cache_max_age() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Errors reported by project operations.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Selections(#[from] SelectionsError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Variable(#[from] VarError),

    #[error("unknown configuration '{config}' for package '{package}'")]
    UnknownConfiguration { package: String, config: String },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("no valid configuration for package '{0}' on this platform")]
    NoValidConfiguration(String),

    #[error("root package target type '{0}' cannot be built directly")]
    UnbuildableRoot(TargetType),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options controlling dependency resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOptions {
    /// Ignore existing selections and pick the best candidates.
    pub upgrade: bool,
    /// Let pre-release versions compete with releases.
    pub pre_release: bool,
    /// Reuse a recent cached upgrade result when the selections are clean.
    pub use_cached_result: bool,
    /// Only report what would change, without touching selections.
    pub print_upgrades_only: bool,
    /// Write the result into the selections.
    pub select: bool,
}

/// On-disk shape of `.dub/dub.json`.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProjectCacheData {
    last_upgrade: Option<String>,
    cached_upgrades: BTreeMap<String, String>,
}

/// The per-project cache (`<root>/.dub/dub.json`).
#[derive(Debug, Default)]
struct ProjectCache {
    data: ProjectCacheData,
}

impl ProjectCache {
    /// Loads the cache leniently: anything unreadable degrades to empty.
    fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&text) {
            Ok(data) => Self { data },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt project cache");
                Self::default()
            }
        }
    }

    fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.data).unwrap_or_default();
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)
    }

    fn is_fresh(&self) -> bool {
        self.data
            .last_upgrade
            .as_deref()
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .is_some_and(|t| chrono::Utc::now().signed_duration_since(t) < upgrade_cache_max_age())
    }

    fn cached_upgrades(&self) -> Option<BTreeMap<String, Dependency>> {
        let mut result = BTreeMap::new();
        for (name, spec) in &self.data.cached_upgrades {
            result.insert(name.clone(), spec.parse().ok()?);
        }
        Some(result)
    }

    fn record_upgrade(&mut self, result: &BTreeMap<String, Dependency>) {
        self.data.last_upgrade = Some(chrono::Utc::now().to_rfc3339());
        self.data.cached_upgrades = result
            .iter()
            .map(|(n, d)| (n.clone(), d.to_string()))
            .collect();
    }
}

/// The root package plus the transitively resolved dependency packages.
#[derive(Debug)]
pub struct Project {
    root: Rc<Package>,
    dependencies: Vec<Rc<Package>>,
    missing: BTreeSet<String>,
    selections: SelectedVersions,
    cache: ProjectCache,
}

impl Project {
    /// Loads the project rooted at a directory and walks its dependency
    /// graph.
    ///
    /// # Errors
    ///
    /// Fails when the root recipe cannot be loaded or the selections file
    /// has an unsupported version.
    pub fn load(pm: &mut PackageManager, root_path: &Path) -> Result<Self, ProjectError> {
        let root = pm.get_or_load_package(root_path)?;
        Self::from_package(pm, root)
    }

    /// Builds a project around an already loaded root package.
    ///
    /// # Errors
    ///
    /// Fails when the selections file has an unsupported version.
    pub fn from_package(pm: &mut PackageManager, root: Rc<Package>) -> Result<Self, ProjectError> {
        let selections = SelectedVersions::load(&root.path().join(SELECTIONS_FILE))?;
        let cache = ProjectCache::load(&root.path().join(DUB_DIR).join(PROJECT_CACHE_FILE));
        let mut project = Self {
            root,
            dependencies: Vec::new(),
            missing: BTreeSet::new(),
            selections,
            cache,
        };
        project.reinit(pm);
        Ok(project)
    }

    /// The root package.
    #[must_use]
    pub fn root_package(&self) -> &Rc<Package> {
        &self.root
    }

    /// The resolved dependency packages (root sub-packages included).
    #[must_use]
    pub fn dependencies(&self) -> &[Rc<Package>] {
        &self.dependencies
    }

    /// Dependency names that could not be bound yet; an `upgrade` run is
    /// needed to fetch them.
    #[must_use]
    pub fn missing_dependencies(&self) -> &BTreeSet<String> {
        &self.missing
    }

    /// The persisted selections.
    #[must_use]
    pub fn selections(&self) -> &SelectedVersions {
        &self.selections
    }

    /// True when every declared dependency is bound.
    #[must_use]
    pub fn has_all_dependencies(&self) -> bool {
        self.missing.is_empty()
    }

    /// A bound package by (qualified) name; the root itself included.
    #[must_use]
    pub fn find_package(&self, name: &str) -> Option<&Rc<Package>> {
        if self.root.name() == name {
            return Some(&self.root);
        }
        self.dependencies.iter().find(|p| p.name() == name)
    }

    /// Saves the selections next to the root recipe when dirty.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub fn save_selections(&mut self) -> Result<(), ProjectError> {
        if self.selections.is_dirty() {
            self.selections
                .save(&self.root.path().join(SELECTIONS_FILE))?;
        }
        Ok(())
    }

    // ========== Graph composition ==========

    /// Rewalks the dependency graph from the root, binding each declared
    /// dependency to a package.
    ///
    /// Order of precedence per dependency: the root package and its
    /// sub-packages bind in place; a pinned selection wins next; then an
    /// already-bound peer of the same base package is reused; unresolved
    /// names are recorded as missing.
    pub fn reinit(&mut self, pm: &mut PackageManager) {
        self.dependencies.clear();
        self.missing.clear();

        let root_base = base_package_name(&self.root.name()).to_string();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(self.root.name());

        let mut queue: Vec<Rc<Package>> = vec![self.root.clone()];
        while let Some(pkg) = queue.pop() {
            for (dep_name, dep_spec) in pkg.all_dependencies() {
                if visited.contains(&dep_name) {
                    continue;
                }

                let resolved = self.resolve_dependency(pm, &pkg, &dep_name, &dep_spec, &root_base);
                match resolved {
                    Some(found) => {
                        if !dep_spec.matches(found.version()) {
                            warn!(
                                package = %pkg.name(),
                                dependency = %dep_name,
                                wanted = %dep_spec,
                                got = %found.version(),
                                "bound dependency version does not match the declared specification"
                            );
                        }
                        visited.insert(dep_name.clone());
                        if !Rc::ptr_eq(&found, &self.root) {
                            self.dependencies.push(found.clone());
                            queue.push(found);
                        }
                    }
                    None => {
                        debug!(dependency = %dep_name, "dependency not present yet");
                        self.missing.insert(dep_name);
                    }
                }
            }
        }
    }

    fn resolve_dependency(
        &self,
        pm: &mut PackageManager,
        referrer: &Rc<Package>,
        dep_name: &str,
        dep_spec: &Dependency,
        root_base: &str,
    ) -> Option<Rc<Package>> {
        let base = base_package_name(dep_name);

        // 1. the root package and its sub-packages bind in place
        if base == root_base {
            if dep_name == self.root.name() {
                return Some(self.root.clone());
            }
            return find_under(pm, dep_name, self.root.path());
        }

        // 2. a pinned selection decides; path pins are relative to the root
        if let Some(pinned) = self.selections.get(base) {
            let pinned = absolutize(pinned.clone(), self.root.path());
            return self.bind_spec(pm, dep_name, &pinned);
        }

        // 3. reuse an already-bound peer of the same base package
        if let Some(peer) = self
            .dependencies
            .iter()
            .find(|p| base_package_name(&p.name()) == base)
        {
            if peer.name() == dep_name {
                return Some(peer.clone());
            }
            let base_root = peer
                .parent()
                .map_or_else(|| peer.path().to_path_buf(), |b| b.path().to_path_buf());
            return find_under(pm, dep_name, &base_root);
        }

        // 4. the declared specification itself
        let spec = absolutize(dep_spec.clone(), referrer.path());
        self.bind_spec(pm, dep_name, &spec)
    }

    /// Binds a name to a package described by a concrete spec.
    fn bind_spec(
        &self,
        pm: &mut PackageManager,
        dep_name: &str,
        spec: &Dependency,
    ) -> Option<Rc<Package>> {
        if let Some(path) = spec.path_spec() {
            let loaded = match pm.get_or_load_package(path) {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!(dependency = dep_name, error = %e, "failed to load path dependency");
                    return None;
                }
            };
            if loaded.name() == dep_name {
                return Some(loaded);
            }
            // the path led to the base package of a sub-package
            // dependency: re-apply the sub-package name
            return find_under(pm, dep_name, loaded.path());
        }
        pm.get_best_package(dep_name, spec)
    }

    // ========== Topological iteration ==========

    /// Yields each reachable package exactly once, dependency edges
    /// traversed in sorted name order and filtered by the referrer's
    /// active configuration.
    #[must_use]
    pub fn get_topological_package_list(
        &self,
        children_first: bool,
        root: Option<&Rc<Package>>,
        configs: &BTreeMap<String, String>,
    ) -> Vec<Rc<Package>> {
        let start = root.unwrap_or(&self.root);
        let mut result = Vec::new();
        let mut visited = BTreeSet::new();
        self.topological_visit(start, children_first, configs, &mut visited, &mut result);
        result
    }

    fn topological_visit(
        &self,
        pkg: &Rc<Package>,
        children_first: bool,
        configs: &BTreeMap<String, String>,
        visited: &mut BTreeSet<String>,
        result: &mut Vec<Rc<Package>>,
    ) {
        if !visited.insert(pkg.name()) {
            return;
        }
        if !children_first {
            result.push(pkg.clone());
        }
        let config = configs.get(&pkg.name()).map(String::as_str);
        for dep_name in pkg.dependencies(config).keys() {
            if let Some(dep) = self.find_package(dep_name) {
                self.topological_visit(&dep.clone(), children_first, configs, visited, result);
            }
        }
        if children_first {
            result.push(pkg.clone());
        }
    }

    // ========== Configuration resolution ==========

    /// Computes one configuration per reachable package such that every
    /// configuration admits the platform and every referrer agrees,
    /// honoring sub-configuration overrides.
    ///
    /// # Errors
    ///
    /// Returns `DependencyCycle` for cyclic package graphs and
    /// `NoValidConfiguration` when the constraints cannot be met.
    pub fn get_package_configs(
        &self,
        platform: &BuildPlatform,
        root_config: Option<&str>,
    ) -> Result<BTreeMap<String, String>, ProjectError> {
        let mut solver = ConfigSolver {
            project: self,
            platform,
            order: Vec::new(),
            candidates: BTreeMap::new(),
        };
        let mut stack = Vec::new();
        solver.discover(&self.root, root_config, &mut stack)?;
        solver.solve(root_config)
    }

    // ========== Build settings aggregation ==========

    /// Appends the per-platform build settings of every package (in
    /// parents-first topological order) to `dst`, expanding `$VARIABLE`
    /// references. The root package also contributes its target and
    /// working-directory settings. In shallow mode non-root source files
    /// are dropped and the root target type is not validated.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConfiguration` when the configuration map lacks a
    /// reachable package, `UnknownVariable` for bad `$` references, and
    /// `UnbuildableRoot` when the root resolves to a non-buildable
    /// target type (unless `shallow`).
    pub fn add_build_settings(
        &self,
        dst: &mut BuildSettings,
        platform: &BuildPlatform,
        configs: &BTreeMap<String, String>,
        root_override: Option<&Rc<Package>>,
        shallow: bool,
    ) -> Result<(), ProjectError> {
        let root = root_override.unwrap_or(&self.root);
        let list = self.get_topological_package_list(false, Some(root), configs);

        let package_dirs: BTreeMap<String, PathBuf> = list
            .iter()
            .map(|p| (p.name(), p.path().to_path_buf()))
            .collect();

        for pkg in &list {
            let config =
                configs
                    .get(&pkg.name())
                    .ok_or_else(|| ProjectError::UnknownConfiguration {
                        package: pkg.name(),
                        config: "<none>".to_string(),
                    })?;
            let mut settings = pkg.build_settings(platform, config)?;
            let is_root = Rc::ptr_eq(pkg, root);

            if shallow && !is_root {
                settings.source_files.clear();
            }
            let ctx = VarContext {
                package_dir: pkg.path(),
                root_package_dir: root.path(),
                package_dirs: &package_dirs,
            };
            vars::expand_settings(&mut settings, &ctx)?;

            if is_root {
                if !shallow
                    && matches!(
                        settings.target_type,
                        TargetType::None | TargetType::SourceLibrary
                    )
                {
                    return Err(ProjectError::UnbuildableRoot(settings.target_type));
                }
                dst.target_type = settings.target_type;
                dst.target_path = settings.target_path.clone();
                dst.target_name = settings.target_name.clone();
                dst.working_directory = settings.working_directory.clone();
                dst.main_source_file = settings.main_source_file.clone();
            }
            if settings.target_type != TargetType::None {
                dst.add(&settings);
            }
            dst.add_versions([format!("Have_{}", sanitize_identifier(&pkg.name()))]);
        }
        Ok(())
    }

    // ========== Version resolution ==========

    /// Runs the dependency resolver over the project.
    ///
    /// The result maps every resolved dependency name to a chosen version
    /// or path. With `select` the result is written into the selections
    /// and the graph is rewalked; with `print_upgrades_only` changes are
    /// only reported.
    ///
    /// # Errors
    ///
    /// Propagates resolver conflicts and cycles.
    pub fn upgrade(
        &mut self,
        pm: &mut PackageManager,
        suppliers: &[Box<dyn PackageSupplier>],
        options: UpgradeOptions,
    ) -> Result<BTreeMap<String, Dependency>, ProjectError> {
        if options.use_cached_result && !self.selections.is_dirty() && self.cache.is_fresh() {
            if let Some(cached) = self.cache.cached_upgrades() {
                debug!("using cached upgrade result");
                return Ok(cached);
            }
        }

        let root_node = TreeNode {
            pack: self.root.name(),
            config: Dependency::exact(self.root.version().clone()),
        };
        let mut driver = ProjectResolveDriver {
            pm: &mut *pm,
            suppliers,
            selections: &self.selections,
            root: self.root.clone(),
            options,
            candidate_cache: BTreeMap::new(),
        };
        let mut result = resolver::resolve(&mut driver, root_node)?;

        let root_base = base_package_name(&self.root.name()).to_string();
        result.retain(|name, _| base_package_name(name) != root_base);

        if options.print_upgrades_only {
            for (name, dep) in &result {
                let base = base_package_name(name);
                match self.selections.get(base) {
                    Some(current) if current != dep => {
                        info!(package = base, from = %current, to = %dep, "upgrade available");
                    }
                    None => info!(package = base, to = %dep, "would be selected"),
                    _ => {}
                }
            }
            return Ok(result);
        }

        if options.select {
            let mut by_base: BTreeMap<String, Dependency> = BTreeMap::new();
            for (name, dep) in &result {
                by_base
                    .entry(base_package_name(name).to_string())
                    .or_insert_with(|| relativize(dep.clone(), self.root.path()));
            }
            let stale: Vec<String> = self
                .selections
                .names()
                .filter(|n| !by_base.contains_key(*n))
                .map(str::to_string)
                .collect();
            for name in stale {
                self.selections.deselect(&name);
            }
            for (name, dep) in by_base {
                self.selections.select(name, dep);
            }

            self.cache.record_upgrade(&result);
            if let Err(e) = self
                .cache
                .save(&self.root.path().join(DUB_DIR).join(PROJECT_CACHE_FILE))
            {
                debug!(error = %e, "could not write project cache");
            }
            self.reinit(pm);
        }
        Ok(result)
    }
}

/// Replaces every character outside `[A-Za-z0-9_]` by `_` (used for the
/// `Have_*` version identifiers).
fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Makes a path spec absolute relative to a base directory.
fn absolutize(dep: Dependency, base: &Path) -> Dependency {
    match dep.path_spec() {
        Some(p) if p.is_relative() => {
            let mut absolute = Dependency::path(base.join(p));
            absolute.optional = dep.optional;
            absolute.is_default = dep.is_default;
            absolute
        }
        _ => dep,
    }
}

/// Makes a path spec relative to a base directory where possible (used
/// when persisting selections).
fn relativize(dep: Dependency, base: &Path) -> Dependency {
    match dep.path_spec() {
        Some(p) => match p.strip_prefix(base) {
            Ok(rel) => {
                let mut relative = Dependency::path(rel);
                relative.optional = dep.optional;
                relative.is_default = dep.is_default;
                relative
            }
            Err(_) => dep,
        },
        None => dep,
    }
}

/// Finds a loaded package with a given qualified name rooted under a
/// base directory (sub-package lookup).
fn find_under(pm: &PackageManager, name: &str, base_path: &Path) -> Option<Rc<Package>> {
    pm.packages()
        .into_iter()
        .find(|p| p.name() == name && p.path().starts_with(base_path))
}

// ========== Configuration solving ==========

#[derive(Debug, Clone, PartialEq, Eq)]
struct Vertex {
    pack: String,
    config: String,
}

struct ConfigSolver<'a> {
    project: &'a Project,
    platform: &'a BuildPlatform,
    /// Packages in discovery (root-first) order.
    order: Vec<String>,
    candidates: BTreeMap<String, Vec<String>>,
}

impl ConfigSolver<'_> {
    /// Collects candidate configurations per reachable package,
    /// detecting cycles along the walk.
    fn discover(
        &mut self,
        pkg: &Rc<Package>,
        root_config: Option<&str>,
        stack: &mut Vec<String>,
    ) -> Result<(), ProjectError> {
        let name = pkg.name();
        if let Some(pos) = stack.iter().position(|p| *p == name) {
            let mut cycle: Vec<String> = stack[pos..].to_vec();
            cycle.push(name);
            return Err(ProjectError::DependencyCycle(cycle));
        }
        if self.candidates.contains_key(&name) {
            return Ok(());
        }

        let is_root = Rc::ptr_eq(pkg, &self.project.root);
        let configs: Vec<String> = match (is_root, root_config) {
            (true, Some(config)) => vec![config.to_string()],
            _ => pkg
                .platform_configurations(self.platform, is_root)
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        self.order.push(name.clone());
        self.candidates.insert(name.clone(), configs.clone());

        stack.push(name);
        for config in &configs {
            for dep_name in pkg.dependencies(Some(config.as_str())).keys() {
                if let Some(dep) = self.project.find_package(dep_name) {
                    self.discover(&dep.clone(), root_config, stack)?;
                }
            }
        }
        stack.pop();
        Ok(())
    }

    /// Prunes the `(package, configuration)` candidate graph down to one
    /// vertex per package.
    fn solve(&mut self, root_config: Option<&str>) -> Result<BTreeMap<String, String>, ProjectError> {
        let root_name = self.project.root.name();

        // vertex and edge construction
        let mut vertices: Vec<Vertex> = Vec::new();
        for pack in &self.order {
            for config in &self.candidates[pack] {
                vertices.push(Vertex {
                    pack: pack.clone(),
                    config: config.clone(),
                });
            }
        }
        let index_of = |vertices: &[Vertex], pack: &str, config: &str| {
            vertices
                .iter()
                .position(|v| v.pack == pack && v.config == config)
        };

        // per vertex: the resolved dependencies its configuration enables
        let mut vertex_deps: Vec<Vec<String>> = Vec::with_capacity(vertices.len());
        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (vi, vertex) in vertices.iter().enumerate() {
            let Some(pkg) = self.project.find_package(&vertex.pack).cloned() else {
                vertex_deps.push(Vec::new());
                continue;
            };
            let mut deps = Vec::new();
            for dep_name in pkg.dependencies(Some(vertex.config.as_str())).keys() {
                let Some(_dep) = self.project.find_package(dep_name) else {
                    continue;
                };
                deps.push((*dep_name).to_string());
                let allowed: Vec<String> = match pkg.sub_configuration(&vertex.config, dep_name) {
                    Some(forced) => vec![forced.to_string()],
                    None => self.candidates.get(*dep_name).cloned().unwrap_or_default(),
                };
                for config in &allowed {
                    if let Some(ti) = index_of(&vertices, dep_name, config) {
                        edges.insert((vi, ti));
                    }
                }
            }
            vertex_deps.push(deps);
        }

        let mut alive = vec![true; vertices.len()];

        loop {
            let mut changed = false;

            // a vertex whose configuration requires a dependency it cannot
            // reach any candidate of is itself invalid
            for vi in 0..vertices.len() {
                if !alive[vi] {
                    continue;
                }
                if root_config.is_some() && vertices[vi].pack == root_name {
                    continue;
                }
                let unreachable_dep = vertex_deps[vi].iter().any(|dep| {
                    let has_edge = (0..vertices.len()).any(|ti| {
                        alive[ti] && vertices[ti].pack == *dep && edges.contains(&(vi, ti))
                    });
                    !has_edge
                });
                if unreachable_dep {
                    alive[vi] = false;
                    changed = true;
                }
            }

            // delete any vertex not reachable from every parent package
            // that depends on its package
            for vi in 0..vertices.len() {
                if !alive[vi] {
                    continue;
                }
                if root_config.is_some() && vertices[vi].pack == root_name {
                    continue;
                }
                let pack = &vertices[vi].pack;
                let rejected = self.order.iter().any(|parent| {
                    if parent == pack {
                        return false;
                    }
                    // does any alive configuration of `parent` depend on us?
                    let parent_vertices: Vec<usize> = (0..vertices.len())
                        .filter(|pi| alive[*pi] && vertices[*pi].pack == *parent)
                        .collect();
                    if parent_vertices.is_empty()
                        || !parent_vertices
                            .iter()
                            .any(|pi| vertex_deps[*pi].iter().any(|d| d == pack))
                    {
                        return false;
                    }
                    // then at least one of them must reach this vertex
                    !parent_vertices
                        .iter()
                        .any(|pi| edges.contains(&(*pi, vi)))
                });
                if rejected {
                    alive[vi] = false;
                    changed = true;
                }
            }

            if changed {
                continue;
            }

            // fixed point: narrow the topologically first package that
            // still has multiple candidates to its first (declaration
            // order) candidate
            let mut narrowed = false;
            for pack in &self.order {
                let alive_vertices: Vec<usize> = (0..vertices.len())
                    .filter(|vi| alive[*vi] && vertices[*vi].pack == *pack)
                    .collect();
                if alive_vertices.len() > 1 {
                    for vi in &alive_vertices[1..] {
                        alive[*vi] = false;
                    }
                    narrowed = true;
                    break;
                }
            }
            if !narrowed {
                break;
            }
        }

        // exactly one configuration per reachable package
        let mut result = BTreeMap::new();
        for (vi, vertex) in vertices.iter().enumerate() {
            if alive[vi] {
                result.insert(vertex.pack.clone(), vertex.config.clone());
            }
        }
        if !result.contains_key(&root_name) {
            return Err(ProjectError::NoValidConfiguration(root_name));
        }
        // every package still referenced by a surviving vertex must have
        // a configuration
        for (vi, _) in vertices.iter().enumerate() {
            if !alive[vi] {
                continue;
            }
            for dep in &vertex_deps[vi] {
                if !result.contains_key(dep) {
                    return Err(ProjectError::NoValidConfiguration(dep.clone()));
                }
            }
        }
        Ok(result)
    }
}

// ========== Resolver driver ==========

/// Adapts the project, package manager, selections and registries to the
/// generic resolver.
struct ProjectResolveDriver<'a> {
    pm: &'a mut PackageManager,
    suppliers: &'a [Box<dyn PackageSupplier>],
    selections: &'a SelectedVersions,
    root: Rc<Package>,
    options: UpgradeOptions,
    candidate_cache: BTreeMap<String, Vec<Dependency>>,
}

impl ProjectResolveDriver<'_> {
    /// Loads (fetching if necessary) the package a node refers to.
    fn get_package(
        &mut self,
        name: &str,
        config: &Dependency,
    ) -> Result<Rc<Package>, ResolverError> {
        if name == self.root.name() {
            return Ok(self.root.clone());
        }
        if let Some(path) = config.path_spec() {
            let loaded = self.pm.get_or_load_package(path)?;
            if loaded.name() == name {
                return Ok(loaded);
            }
            return find_under(self.pm, name, loaded.path())
                .ok_or_else(|| ResolverError::UnknownPackage(name.to_string()));
        }

        let version = config
            .exact_version()
            .ok_or_else(|| ResolverError::UnknownPackage(name.to_string()))?;
        if let Some(found) = self.pm.get_package(name, &version) {
            return Ok(found);
        }

        // fetch the base package to read the (sub-)recipe; the fetch is
        // cached through the normal installation path
        let base = base_package_name(name).to_string();
        let staging = self.pm.location(PlacementLocation::Local).join(".fetch");
        std::fs::create_dir_all(&staging).map_err(ManagerError::Io)?;
        for supplier in self.suppliers {
            match supplier.fetch(&base, &version, &staging) {
                Ok(archive) => {
                    self.pm.store_fetched_package(
                        &archive,
                        &base,
                        &version,
                        PlacementLocation::Local,
                    )?;
                    let _ = std::fs::remove_file(&archive);
                    if let Some(found) = self.pm.get_package(name, &version) {
                        return Ok(found);
                    }
                }
                Err(SupplierError::UnknownPackage(_) | SupplierError::UnknownVersion { .. }) => {}
                Err(e) => {
                    warn!(supplier = %supplier.description(), error = %e, "supplier failed");
                }
            }
        }
        Err(ResolverError::UnknownPackage(name.to_string()))
    }

    fn registry_versions(&self, base: &str) -> Vec<Version> {
        let mut versions = Vec::new();
        for supplier in self.suppliers {
            match supplier.versions(base) {
                Ok(mut found) => versions.append(&mut found),
                Err(SupplierError::UnknownPackage(_)) => {}
                Err(e) => {
                    warn!(supplier = %supplier.description(), error = %e, "supplier failed");
                }
            }
        }
        versions
    }
}

impl DependencyProvider for ProjectResolveDriver<'_> {
    type Config = Dependency;

    fn all_candidates(&mut self, pack: &str) -> Result<Vec<Dependency>, ResolverError> {
        if let Some(cached) = self.candidate_cache.get(pack) {
            return Ok(cached.clone());
        }
        let base = base_package_name(pack).to_string();

        // a pinned selection is the only candidate unless upgrading
        if !self.options.upgrade {
            if let Some(pinned) = self.selections.get(&base) {
                let pinned = absolutize(pinned.clone(), self.root.path());
                self.candidate_cache
                    .insert(pack.to_string(), vec![pinned.clone()]);
                return Ok(vec![pinned]);
            }
        }

        let mut versions = self.pm.package_versions(pack);
        versions.extend(self.registry_versions(&base));
        versions.sort_by(|a, b| b.cmp(a));
        versions.dedup();
        if versions.is_empty() {
            return Err(ResolverError::UnknownPackage(pack.to_string()));
        }

        // numeric versions beat branches; pre-releases go to the back
        // unless explicitly allowed
        let (branches, numeric): (Vec<Version>, Vec<Version>) =
            versions.into_iter().partition(Version::is_branch);
        let ordered: Vec<Version> = if self.options.pre_release {
            numeric.into_iter().chain(branches).collect()
        } else {
            let (pre, stable): (Vec<Version>, Vec<Version>) =
                numeric.into_iter().partition(Version::is_pre_release);
            stable.into_iter().chain(pre).chain(branches).collect()
        };

        // drop candidates whose recipe cannot be loaded
        let mut candidates = Vec::new();
        for version in ordered {
            let candidate = Dependency::exact(version.clone());
            match self.get_package(pack, &candidate) {
                Ok(_) => candidates.push(candidate),
                Err(e) => {
                    debug!(package = pack, %version, error = %e, "dropping unloadable candidate");
                }
            }
        }
        self.candidate_cache
            .insert(pack.to_string(), candidates.clone());
        Ok(candidates)
    }

    fn specific_candidates(
        &mut self,
        pack: &str,
        constraint: &Dependency,
    ) -> Result<Option<Vec<Dependency>>, ResolverError> {
        let Some(path) = constraint.path_spec() else {
            return Ok(None);
        };
        // a loadable path pin is the single candidate; a broken one
        // yields the empty set and rejects the branch
        let candidate = Dependency::path(path);
        match self.get_package(pack, &candidate) {
            Ok(_) => Ok(Some(vec![candidate])),
            Err(_) => Ok(Some(Vec::new())),
        }
    }

    fn children(
        &mut self,
        node: &TreeNode<Dependency>,
    ) -> Result<Vec<TreeNodes<Dependency>>, ResolverError> {
        let pkg = self.get_package(&node.pack, &node.config)?;
        let root_base = base_package_name(&self.root.name()).to_string();

        let mut edges = Vec::new();
        for (dep_name, dep_spec) in pkg.all_dependencies() {
            let spec = absolutize(dep_spec, pkg.path());
            let base = base_package_name(&dep_name);

            // references back into the root package's namespace are
            // recognized by name and short-circuited
            if base == root_base {
                if !spec.matches(self.root.version()) {
                    warn!(
                        package = %pkg.name(),
                        dependency = %dep_name,
                        wanted = %spec,
                        "dependency on the root package does not match its version"
                    );
                }
                continue;
            }

            let dep_type = if !spec.optional {
                DependencyType::Required
            } else if self.selections.has(base) {
                DependencyType::Optional
            } else if spec.is_default && !self.selections.is_from_file() {
                DependencyType::OptionalDefault
            } else {
                // deselected in the prior selection state
                continue;
            };

            edges.push(TreeNodes {
                pack: dep_name,
                configs: spec,
                dep_type,
            });
        }
        Ok(edges)
    }

    fn matches(&self, constraint: &Dependency, candidate: &Dependency) -> bool {
        match candidate.exact_version() {
            Some(version) => constraint.matches(&version),
            // path candidates satisfy whatever is found at the path
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_sanitization() {
        assert_eq!(sanitize_identifier("my-pkg"), "my_pkg");
        assert_eq!(sanitize_identifier("base:sub"), "base_sub");
        assert_eq!(sanitize_identifier("plain0"), "plain0");
    }

    #[test]
    fn path_spec_rebasing() {
        let dep = Dependency::path("sub/dir");
        let abs = absolutize(dep, Path::new("/base"));
        assert_eq!(abs.path_spec().unwrap(), Path::new("/base/sub/dir"));

        let rel = relativize(abs, Path::new("/base"));
        assert_eq!(rel.path_spec().unwrap(), Path::new("sub/dir"));

        let version = Dependency::exact("1.0.0".parse().unwrap());
        assert_eq!(absolutize(version.clone(), Path::new("/base")), version);
    }

    #[test]
    fn cache_freshness() {
        let mut cache = ProjectCache::default();
        assert!(!cache.is_fresh());
        cache.record_upgrade(&BTreeMap::new());
        assert!(cache.is_fresh());

        cache.data.last_upgrade = Some("2001-01-01T00:00:00+00:00".to_string());
        assert!(!cache.is_fresh());
        cache.data.last_upgrade = Some("garbage".to_string());
        assert!(!cache.is_fresh());
    }

    #[test]
    fn cached_upgrades_round_trip() {
        let mut cache = ProjectCache::default();
        let mut result = BTreeMap::new();
        result.insert(
            "dep".to_string(),
            Dependency::exact("1.2.0".parse().unwrap()),
        );
        cache.record_upgrade(&result);
        assert_eq!(cache.cached_upgrades(), Some(result));
    }
}
