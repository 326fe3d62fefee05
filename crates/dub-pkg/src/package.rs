//! A loaded package: a recipe rooted at a directory.
//!
//! Loading discovers the recipe file, decodes it, fills layout-derived
//! defaults (conventional source folders, the application main file),
//! synthesizes default configurations, and fixes the effective version
//! (recorded, inherited from the parent, or inferred from the SCM).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::warn;

use dub_recipe::recipe::{BuildSettingsTemplate, ConfigurationInfo};
use dub_recipe::settings::{BuildOptions, BuildSettings, TargetType};
use dub_recipe::{parse_recipe, Dependency, Recipe, RecipeError, Version, RECIPE_FILES};

use crate::scm;

/// Conventional string-import folder.
pub const VIEWS_DIR: &str = "views";

/// Conventional source folders, in probe order.
pub const SOURCE_DIRS: &[&str] = &["source", "src"];

/// Source file extension.
pub const SOURCE_EXT: &str = "d";

/// Errors that can occur when loading or querying packages.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("no package recipe found in {0}")]
    RecipeNotFound(PathBuf),

    #[error("failed to read recipe {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("in {path}: {source}")]
    Recipe {
        path: PathBuf,
        #[source]
        source: RecipeError,
    },

    #[error("unknown configuration '{config}' for package '{package}'")]
    UnknownConfiguration { package: String, config: String },

    #[error("unknown build type '{build_type}' for package '{package}'")]
    UnknownBuildType { package: String, build_type: String },
}

/// A recipe bound to a directory, with its effective version.
#[derive(Debug)]
pub struct Package {
    recipe: Recipe,
    path: PathBuf,
    recipe_path: PathBuf,
    version: Version,
    parent: Option<Rc<Package>>,
}

impl Package {
    /// Finds the recipe file of a package directory, trying `dub.json`,
    /// `dub.sdl` and the legacy `package.json` in that order.
    #[must_use]
    pub fn find_recipe_file(dir: &Path) -> Option<PathBuf> {
        RECIPE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }

    /// Loads a package from a directory.
    ///
    /// `recipe_file` overrides discovery; `parent` marks a sub-package;
    /// `version_override` wins over everything else (used for versioned
    /// cache directories).
    ///
    /// # Errors
    ///
    /// Returns an error when no recipe is found or decoding fails.
    pub fn load(
        root: &Path,
        recipe_file: Option<PathBuf>,
        parent: Option<Rc<Package>>,
        version_override: Option<Version>,
    ) -> Result<Self, PackageError> {
        let recipe_path = match recipe_file {
            Some(path) => path,
            None => Self::find_recipe_file(root)
                .ok_or_else(|| PackageError::RecipeNotFound(root.to_path_buf()))?,
        };
        let text = std::fs::read_to_string(&recipe_path).map_err(|e| PackageError::Io {
            path: recipe_path.clone(),
            source: e,
        })?;
        let filename = recipe_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent_name = parent.as_ref().map(|p| p.name());
        let recipe = parse_recipe(&text, &filename, parent_name.as_deref()).map_err(|e| {
            PackageError::Recipe {
                path: recipe_path.clone(),
                source: e,
            }
        })?;
        Ok(Self::from_recipe(
            recipe,
            root,
            recipe_path,
            parent,
            version_override,
        ))
    }

    /// Builds a package from an already decoded recipe (inline
    /// sub-packages reuse their parent's recipe file).
    #[must_use]
    pub fn from_recipe(
        recipe: Recipe,
        root: &Path,
        recipe_path: PathBuf,
        parent: Option<Rc<Package>>,
        version_override: Option<Version>,
    ) -> Self {
        let version = determine_version(&recipe, root, parent.as_deref(), version_override);
        let mut package = Self {
            recipe,
            path: root.to_path_buf(),
            recipe_path,
            version,
            parent,
        };
        package.apply_layout_defaults();
        package.synthesize_default_configurations();
        package.lint();
        package
    }

    // ========== Accessors ==========

    /// The qualified package name (`parent:child` for sub-packages).
    #[must_use]
    pub fn name(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}:{}", parent.name(), self.recipe.name),
            None => self.recipe.name.clone(),
        }
    }

    /// The name of the outermost enclosing package.
    #[must_use]
    pub fn base_name(&self) -> String {
        match &self.parent {
            Some(parent) => parent.base_name(),
            None => self.recipe.name.clone(),
        }
    }

    /// The effective package version (inherited from the parent for
    /// sub-packages).
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The package root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recipe file this package was loaded from.
    #[must_use]
    pub fn recipe_path(&self) -> &Path {
        &self.recipe_path
    }

    /// The underlying recipe.
    #[must_use]
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// The enclosing package, for sub-packages.
    #[must_use]
    pub fn parent(&self) -> Option<&Rc<Package>> {
        self.parent.as_ref()
    }

    /// True for sub-packages.
    #[must_use]
    pub fn is_sub_package(&self) -> bool {
        self.parent.is_some()
    }

    // ========== Construction helpers ==========

    /// Fills conventional layout defaults into the recipe (views folder,
    /// source/import paths).
    fn apply_layout_defaults(&mut self) {
        if self.recipe.build.string_import_paths.is_empty()
            && self.path.join(VIEWS_DIR).is_dir()
        {
            self.recipe
                .build
                .string_import_paths
                .add("", vec![VIEWS_DIR.to_string()]);
        }
        if self.recipe.build.source_paths.is_empty() {
            for dir in SOURCE_DIRS {
                if self.path.join(dir).is_dir() {
                    self.recipe
                        .build
                        .source_paths
                        .add("", vec![(*dir).to_string()]);
                    self.recipe
                        .build
                        .import_paths
                        .add("", vec![(*dir).to_string()]);
                    break;
                }
            }
        }
    }

    /// Looks for an application entry point in the declared source paths.
    fn detect_app_main_file(&self) -> Option<String> {
        let name = &self.recipe.name;
        let candidates = [
            format!("app.{SOURCE_EXT}"),
            format!("main.{SOURCE_EXT}"),
            format!("{name}/main.{SOURCE_EXT}"),
            format!("{name}/app.{SOURCE_EXT}"),
        ];
        for (_, paths) in self.recipe.build.source_paths.entries() {
            for source_path in paths {
                for candidate in &candidates {
                    let relative = Path::new(source_path).join(candidate);
                    if self.path.join(&relative).is_file() {
                        return Some(relative.to_string_lossy().into_owned());
                    }
                }
            }
        }
        None
    }

    /// Synthesizes the default configurations when the recipe declares
    /// none: `application` for executables, `application` + `library` for
    /// auto-detected main files, plain `library` otherwise.
    fn synthesize_default_configurations(&mut self) {
        if !self.recipe.configurations.is_empty() {
            return;
        }
        let root_type = self
            .recipe
            .build
            .target_type
            .unwrap_or(TargetType::Autodetect);
        let app_main = self.detect_app_main_file();

        match root_type {
            TargetType::Executable => {
                let mut build = BuildSettingsTemplate {
                    target_type: Some(TargetType::Executable),
                    ..BuildSettingsTemplate::default()
                };
                if self.recipe.build.main_source_file.is_none() {
                    build.main_source_file = app_main;
                }
                self.recipe.configurations.push(ConfigurationInfo {
                    name: "application".to_string(),
                    platforms: Vec::new(),
                    build,
                });
            }
            TargetType::Autodetect => {
                let mut library = BuildSettingsTemplate {
                    target_type: Some(TargetType::Library),
                    ..BuildSettingsTemplate::default()
                };
                if let Some(main) = app_main {
                    let app = BuildSettingsTemplate {
                        target_type: Some(TargetType::Executable),
                        main_source_file: Some(main.clone()),
                        ..BuildSettingsTemplate::default()
                    };
                    self.recipe.configurations.push(ConfigurationInfo {
                        name: "application".to_string(),
                        platforms: Vec::new(),
                        build: app,
                    });
                    library.excluded_source_files.add("", vec![main]);
                }
                self.recipe.configurations.push(ConfigurationInfo {
                    name: "library".to_string(),
                    platforms: Vec::new(),
                    build: library,
                });
            }
            other => {
                self.recipe.configurations.push(ConfigurationInfo {
                    name: "library".to_string(),
                    platforms: Vec::new(),
                    build: BuildSettingsTemplate {
                        target_type: Some(other),
                        ..BuildSettingsTemplate::default()
                    },
                });
            }
        }
    }

    fn lint(&self) {
        if self.recipe.name.is_empty() {
            warn!(path = %self.path.display(), "package has no name");
        }
        if let Some(parent) = &self.parent {
            if self.recipe.license.is_some()
                && self.recipe.license != parent.recipe().license
            {
                warn!(
                    package = %self.name(),
                    "sub-package declares a license differing from its parent"
                );
            }
        }
    }

    // ========== Configuration queries ==========

    /// The configuration names, in declaration order.
    #[must_use]
    pub fn configurations(&self) -> Vec<&str> {
        self.recipe
            .configurations
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Resolves the build settings of one configuration for a platform:
    /// the root template first, then the configuration's template on top.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConfiguration` for names the recipe does not
    /// declare.
    pub fn build_settings(
        &self,
        platform: &dub_recipe::BuildPlatform,
        config: &str,
    ) -> Result<BuildSettings, PackageError> {
        let config_info =
            self.recipe
                .configuration(config)
                .ok_or_else(|| PackageError::UnknownConfiguration {
                    package: self.name(),
                    config: config.to_string(),
                })?;
        let mut settings = BuildSettings::default();
        self.recipe.build.fold_into(&mut settings, platform);
        config_info.build.fold_into(&mut settings, platform);

        if settings.target_name.is_empty() {
            settings.target_name = self.name().replace(':', "_");
        }
        if settings.target_type == TargetType::Autodetect {
            settings.target_type = TargetType::Library;
        }
        Ok(settings)
    }

    /// The first configuration admitting the platform; executables are
    /// skipped unless `allow_non_library` is set.
    #[must_use]
    pub fn default_configuration(
        &self,
        platform: &dub_recipe::BuildPlatform,
        allow_non_library: bool,
    ) -> Option<&str> {
        self.recipe
            .configurations
            .iter()
            .find(|c| {
                c.matches_platform(platform)
                    && (allow_non_library
                        || c.build.target_type != Some(TargetType::Executable))
            })
            .map(|c| c.name.as_str())
    }

    /// All configurations admitting the platform, with the same
    /// executable filter as `default_configuration`.
    #[must_use]
    pub fn platform_configurations(
        &self,
        platform: &dub_recipe::BuildPlatform,
        is_main: bool,
    ) -> Vec<&str> {
        self.recipe
            .configurations
            .iter()
            .filter(|c| {
                c.matches_platform(platform)
                    && (is_main || c.build.target_type != Some(TargetType::Executable))
            })
            .map(|c| c.name.as_str())
            .collect()
    }

    /// A sub-configuration override for a dependency, declared either in
    /// the named configuration or at the recipe root.
    #[must_use]
    pub fn sub_configuration(&self, config: &str, dependency: &str) -> Option<&str> {
        if let Some(config_info) = self.recipe.configuration(config) {
            if let Some(forced) = config_info.build.sub_configurations.get(dependency) {
                return Some(forced);
            }
        }
        self.recipe
            .build
            .sub_configurations
            .get(dependency)
            .map(String::as_str)
    }

    /// Mixes a named build type into settings.
    ///
    /// Recipe-declared build types override the built-ins; the `$DFLAGS`
    /// pseudo type appends the `DFLAGS` environment variable.
    ///
    /// # Errors
    ///
    /// Returns `UnknownBuildType` for unrecognized names.
    pub fn add_build_type_settings(
        &self,
        settings: &mut BuildSettings,
        platform: &dub_recipe::BuildPlatform,
        build_type: &str,
    ) -> Result<(), PackageError> {
        if let Some(template) = self.recipe.build_types.get(build_type) {
            template.fold_into(settings, platform);
            return Ok(());
        }
        if build_type == "$DFLAGS" {
            if let Ok(dflags) = std::env::var("DFLAGS") {
                settings.add_dflags(dflags.split_whitespace().map(str::to_string));
            }
            return Ok(());
        }
        let options = match build_type {
            "plain" => BuildOptions::none(),
            "debug" => BuildOptions::DEBUG_MODE | BuildOptions::DEBUG_INFO,
            "release" => {
                BuildOptions::RELEASE_MODE | BuildOptions::OPTIMIZE | BuildOptions::INLINE
            }
            "release-debug" => {
                BuildOptions::RELEASE_MODE
                    | BuildOptions::OPTIMIZE
                    | BuildOptions::INLINE
                    | BuildOptions::DEBUG_INFO
            }
            "release-nobounds" => {
                BuildOptions::RELEASE_MODE
                    | BuildOptions::OPTIMIZE
                    | BuildOptions::INLINE
                    | BuildOptions::NO_BOUNDS_CHECK
            }
            "unittest" => {
                BuildOptions::UNITTESTS | BuildOptions::DEBUG_MODE | BuildOptions::DEBUG_INFO
            }
            "docs" => {
                settings.add_dflags(["-Dddocs".to_string()]);
                BuildOptions::SYNTAX_ONLY
            }
            "ddox" => {
                settings.add_dflags(["-Xfdocs.json".to_string(), "-Df__dummy.html".to_string()]);
                BuildOptions::SYNTAX_ONLY
            }
            "profile" => {
                BuildOptions::PROFILE
                    | BuildOptions::OPTIMIZE
                    | BuildOptions::INLINE
                    | BuildOptions::DEBUG_INFO
            }
            "profile-gc" => BuildOptions::PROFILE_GC | BuildOptions::DEBUG_INFO,
            "cov" => BuildOptions::COVERAGE | BuildOptions::DEBUG_INFO,
            "unittest-cov" => {
                BuildOptions::UNITTESTS
                    | BuildOptions::COVERAGE
                    | BuildOptions::DEBUG_MODE
                    | BuildOptions::DEBUG_INFO
            }
            _ => {
                return Err(PackageError::UnknownBuildType {
                    package: self.name(),
                    build_type: build_type.to_string(),
                })
            }
        };
        settings.add_options(options);
        Ok(())
    }

    // ========== Dependency queries ==========

    /// The dependencies visible in one configuration: the root template's
    /// plus (when a configuration is given) that configuration's, the
    /// latter overriding same-named entries.
    #[must_use]
    pub fn dependencies(&self, config: Option<&str>) -> BTreeMap<&str, &Dependency> {
        let mut deps: BTreeMap<&str, &Dependency> = self
            .recipe
            .build
            .dependencies
            .iter()
            .map(|(n, d)| (n.as_str(), d))
            .collect();
        if let Some(config) = config {
            if let Some(config_info) = self.recipe.configuration(config) {
                for (name, dep) in &config_info.build.dependencies {
                    deps.insert(name, dep);
                }
            }
        }
        deps
    }

    /// Every dependency edge declared anywhere in the recipe (root
    /// template and all configurations), sorted by package name, without
    /// exact duplicates.
    #[must_use]
    pub fn all_dependencies(&self) -> Vec<(String, Dependency)> {
        let mut edges: Vec<(String, Dependency)> = Vec::new();
        let mut push = |name: &String, dep: &Dependency| {
            if !edges.iter().any(|(n, d)| n == name && d == dep) {
                edges.push((name.clone(), dep.clone()));
            }
        };
        for (name, dep) in &self.recipe.build.dependencies {
            push(name, dep);
        }
        for config in &self.recipe.configurations {
            for (name, dep) in &config.build.dependencies {
                push(name, dep);
            }
        }
        edges.sort_by(|(a, _), (b, _)| a.cmp(b));
        edges
    }

    /// Tests whether a configuration (or the root template) depends on a
    /// package.
    #[must_use]
    pub fn has_dependency(&self, name: &str, config: &str) -> bool {
        self.dependencies(Some(config)).contains_key(name)
    }
}

fn determine_version(
    recipe: &Recipe,
    root: &Path,
    parent: Option<&Package>,
    version_override: Option<Version>,
) -> Version {
    if let Some(version) = version_override {
        return version;
    }
    // sub-packages always carry their parent's version
    if let Some(parent) = parent {
        if recipe.version.is_some() {
            warn!(
                package = %recipe.name,
                parent = %parent.name(),
                "ignoring the version declared by a sub-package"
            );
        }
        return parent.version().clone();
    }
    if let Some(text) = &recipe.version {
        match text.parse() {
            Ok(version) => return version,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "ignoring invalid recipe version");
            }
        }
    }
    scm::determine_version_with_fallback(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dub_recipe::BuildPlatform;
    use std::fs;
    use tempfile::TempDir;

    fn platform() -> BuildPlatform {
        BuildPlatform {
            platform: vec!["linux".into(), "posix".into()],
            architecture: vec!["x86_64".into()],
            compiler: "dmd".into(),
        }
    }

    fn write_package(dir: &Path, recipe: &str) {
        fs::write(dir.join("dub.json"), recipe).unwrap();
    }

    fn load(dir: &Path) -> Package {
        Package::load(dir, None, None, None).unwrap()
    }

    #[test]
    fn recipe_discovery_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("dub.sdl"), "name \"sdl-pkg\"\n").unwrap();
        fs::write(tmp.path().join("package.json"), r#"{ "name": "legacy" }"#).unwrap();
        let pkg = load(tmp.path());
        assert_eq!(pkg.name(), "sdl-pkg");

        write_package(tmp.path(), r#"{ "name": "json-pkg", "version": "1.0.0" }"#);
        let pkg = load(tmp.path());
        assert_eq!(pkg.name(), "json-pkg");
    }

    #[test]
    fn missing_recipe() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            Package::load(tmp.path(), None, None, None),
            Err(PackageError::RecipeNotFound(_))
        ));
    }

    #[test]
    fn source_folder_defaults() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("source")).unwrap();
        fs::create_dir_all(tmp.path().join("views")).unwrap();
        write_package(tmp.path(), r#"{ "name": "demo", "version": "1.0.0" }"#);

        let pkg = load(tmp.path());
        let settings = pkg.build_settings(&platform(), "library").unwrap();
        assert_eq!(settings.source_paths, vec!["source"]);
        assert_eq!(settings.import_paths, vec!["source"]);
        assert_eq!(settings.string_import_paths, vec!["views"]);
    }

    #[test]
    fn executable_gets_application_configuration() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("source")).unwrap();
        fs::write(tmp.path().join("source/app.d"), "void main() {}").unwrap();
        write_package(
            tmp.path(),
            r#"{ "name": "demo", "version": "1.0.0", "targetType": "executable" }"#,
        );

        let pkg = load(tmp.path());
        assert_eq!(pkg.configurations(), vec!["application"]);
        let settings = pkg.build_settings(&platform(), "application").unwrap();
        assert_eq!(settings.target_type, TargetType::Executable);
        assert_eq!(settings.main_source_file, "source/app.d");
    }

    #[test]
    fn autodetect_with_main_file_gets_both_configurations() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("source")).unwrap();
        fs::write(tmp.path().join("source/main.d"), "void main() {}").unwrap();
        write_package(tmp.path(), r#"{ "name": "demo", "version": "1.0.0" }"#);

        let pkg = load(tmp.path());
        assert_eq!(pkg.configurations(), vec!["application", "library"]);
        let lib = pkg.build_settings(&platform(), "library").unwrap();
        assert_eq!(lib.excluded_source_files, vec!["source/main.d"]);
        assert_eq!(
            pkg.default_configuration(&platform(), false),
            Some("library")
        );
        assert_eq!(pkg.default_configuration(&platform(), true), Some("application"));
    }

    #[test]
    fn library_without_main_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("source")).unwrap();
        write_package(tmp.path(), r#"{ "name": "demo", "version": "1.0.0" }"#);

        let pkg = load(tmp.path());
        assert_eq!(pkg.configurations(), vec!["library"]);
    }

    #[test]
    fn target_name_defaults_to_qualified_name() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), r#"{ "name": "base", "version": "1.0.0" }"#);
        let base = Rc::new(load(tmp.path()));

        let sub_recipe = Recipe {
            name: "sub".to_string(),
            ..Recipe::default()
        };
        let sub = Package::from_recipe(
            sub_recipe,
            tmp.path(),
            tmp.path().join("dub.json"),
            Some(base.clone()),
            None,
        );
        assert_eq!(sub.name(), "base:sub");
        assert_eq!(sub.version(), base.version());

        let settings = sub.build_settings(&platform(), "library").unwrap();
        assert_eq!(settings.target_name, "base_sub");
    }

    #[test]
    fn platform_filtered_configurations() {
        let tmp = TempDir::new().unwrap();
        write_package(
            tmp.path(),
            r#"{
                "name": "demo",
                "version": "1.0.0",
                "configurations": [
                    { "name": "win", "platforms": ["windows"] },
                    { "name": "nix", "platforms": ["posix"] },
                    { "name": "app", "targetType": "executable" }
                ]
            }"#,
        );
        let pkg = load(tmp.path());
        assert_eq!(pkg.platform_configurations(&platform(), false), vec!["nix"]);
        assert_eq!(
            pkg.platform_configurations(&platform(), true),
            vec!["nix", "app"]
        );
        assert_eq!(pkg.default_configuration(&platform(), false), Some("nix"));
    }

    #[test]
    fn sub_configuration_lookup() {
        let tmp = TempDir::new().unwrap();
        write_package(
            tmp.path(),
            r#"{
                "name": "demo",
                "version": "1.0.0",
                "subConfigurations": { "dep": "root-choice" },
                "configurations": [
                    { "name": "special", "subConfigurations": { "dep": "special-choice" } },
                    { "name": "plain" }
                ]
            }"#,
        );
        let pkg = load(tmp.path());
        assert_eq!(pkg.sub_configuration("special", "dep"), Some("special-choice"));
        assert_eq!(pkg.sub_configuration("plain", "dep"), Some("root-choice"));
        assert_eq!(pkg.sub_configuration("plain", "other"), None);
    }

    #[test]
    fn build_type_settings() {
        let tmp = TempDir::new().unwrap();
        write_package(
            tmp.path(),
            r#"{
                "name": "demo",
                "version": "1.0.0",
                "buildTypes": { "release": { "buildOptions": ["coverage"] } }
            }"#,
        );
        let pkg = load(tmp.path());

        let mut settings = BuildSettings::default();
        pkg.add_build_type_settings(&mut settings, &platform(), "debug")
            .unwrap();
        assert!(settings.options.contains(BuildOptions::DEBUG_MODE));

        // the recipe's "release" build type replaces the built-in
        let mut settings = BuildSettings::default();
        pkg.add_build_type_settings(&mut settings, &platform(), "release")
            .unwrap();
        assert!(settings.options.contains(BuildOptions::COVERAGE));
        assert!(!settings.options.contains(BuildOptions::RELEASE_MODE));

        let mut settings = BuildSettings::default();
        assert!(matches!(
            pkg.add_build_type_settings(&mut settings, &platform(), "nonsense"),
            Err(PackageError::UnknownBuildType { .. })
        ));
    }

    #[test]
    fn dependency_queries() {
        let tmp = TempDir::new().unwrap();
        write_package(
            tmp.path(),
            r#"{
                "name": "demo",
                "version": "1.0.0",
                "dependencies": { "a": "^1.0.0" },
                "configurations": [
                    { "name": "full", "dependencies": { "b": "^2.0.0" } },
                    { "name": "lite" }
                ]
            }"#,
        );
        let pkg = load(tmp.path());
        assert!(pkg.has_dependency("a", "lite"));
        assert!(pkg.has_dependency("b", "full"));
        assert!(!pkg.has_dependency("b", "lite"));
        assert_eq!(pkg.dependencies(None).len(), 1);

        let all = pkg.all_dependencies();
        assert_eq!(
            all.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
