//! The package manager: an index of packages across search roots, plus
//! fetch/remove.
//!
//! Cache layout per location: `<location>/packages/<name>-<version>/<name>/`
//! holds the unpacked recipe root; `<location>/packages/<name>-<version>.lock`
//! serializes concurrent installers of the same package.

use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use dub_recipe::{SubPackage, Version};
use fs2::FileExt;

use crate::envutil;
use crate::package::{Package, PackageError};

/// Per-location directory holding unpacked packages.
pub const PACKAGES_DIR: &str = "packages";

/// How long an installer waits for a concurrent install of the same
/// package before giving up.
pub const INSTALL_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const INSTALL_LOCK_POLL: Duration = Duration::from_millis(250);

/// Errors reported by the package manager.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("timed out waiting for a concurrent installation of '{0}'")]
    ConcurrentInstallTimeout(String),

    #[error("archive entry '{0}' would escape the destination directory")]
    PathOutsideWorkspace(String),

    #[error("fetched archive for '{0}' does not contain a package recipe")]
    CacheCorrupt(String),

    #[error("package '{0}' is not managed by the package manager")]
    NotManaged(String),
}

/// Which search root a package is installed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementLocation {
    /// Project-local packages.
    Local,
    /// The user-wide package store.
    User,
    /// The system-wide package store.
    System,
}

impl PlacementLocation {
    fn index(self) -> usize {
        match self {
            Self::Local => 0,
            Self::User => 1,
            Self::System => 2,
        }
    }
}

/// Index of known packages across the search roots.
#[derive(Debug)]
pub struct PackageManager {
    locations: Vec<PathBuf>,
    search_paths: Vec<PathBuf>,
    packages: Vec<Rc<Package>>,
}

impl PackageManager {
    /// Creates a manager over the three standard locations. Extra search
    /// paths from `DUBPATH` are picked up automatically.
    #[must_use]
    pub fn new(local: PathBuf, user: PathBuf, system: PathBuf) -> Self {
        Self {
            locations: vec![local, user, system],
            search_paths: envutil::dubpath_entries(),
            packages: Vec::new(),
        }
    }

    /// Adds an explicit override search path, looked at before the
    /// standard locations.
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.push(path);
    }

    /// The root directory of a placement location.
    #[must_use]
    pub fn location(&self, location: PlacementLocation) -> &Path {
        &self.locations[location.index()]
    }

    /// Rescans all search paths and locations, rebuilding the index.
    ///
    /// Broken package directories are skipped with a warning; the cache
    /// is recoverable by re-fetching.
    pub fn refresh(&mut self) {
        self.packages.clear();

        for path in self.search_paths.clone() {
            self.scan_search_path(&path);
        }
        for location in self.locations.clone() {
            self.scan_location(&location);
        }
    }

    /// Search paths contain package directories directly.
    fn scan_search_path(&mut self, path: &Path) {
        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if dir.is_dir() && Package::find_recipe_file(&dir).is_some() {
                self.load_indexed(&dir, None);
            }
        }
    }

    /// Locations hold `<name>-<version>/<name>/` package roots.
    fn scan_location(&mut self, location: &Path) {
        let Ok(entries) = std::fs::read_dir(location.join(PACKAGES_DIR)) else {
            return;
        };
        for entry in entries.flatten() {
            let outer = entry.path();
            let Some(outer_name) = outer.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !outer.is_dir() || outer_name.starts_with('.') {
                continue;
            }
            let Ok(inner_entries) = std::fs::read_dir(&outer) else {
                continue;
            };
            for inner in inner_entries.flatten() {
                let dir = inner.path();
                let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !dir.is_dir() {
                    continue;
                }
                let Some(rest) = outer_name
                    .strip_prefix(name)
                    .and_then(|r| r.strip_prefix('-'))
                else {
                    continue;
                };
                match rest.parse::<Version>() {
                    Ok(version) => {
                        self.load_indexed(&dir, Some(version));
                    }
                    Err(e) => {
                        warn!(dir = %outer.display(), error = %e, "skipping unparsable cache entry");
                    }
                }
            }
        }
    }

    /// Loads a package (and its sub-packages) into the index, unless the
    /// path is indexed already.
    fn load_indexed(&mut self, root: &Path, version: Option<Version>) -> Option<Rc<Package>> {
        if let Some(existing) = self.package_at(root) {
            return Some(existing);
        }
        match Package::load(root, None, None, version) {
            Ok(package) => {
                let package = Rc::new(package);
                self.packages.push(package.clone());
                self.load_sub_packages(&package);
                Some(package)
            }
            Err(e) => {
                warn!(path = %root.display(), error = %e, "skipping broken package directory");
                None
            }
        }
    }

    fn load_sub_packages(&mut self, base: &Rc<Package>) {
        for sub in base.recipe().sub_packages.clone() {
            match sub {
                SubPackage::Inline(recipe) => {
                    let package = Package::from_recipe(
                        *recipe,
                        base.path(),
                        base.recipe_path().to_path_buf(),
                        Some(base.clone()),
                        None,
                    );
                    self.packages.push(Rc::new(package));
                }
                SubPackage::Path(path) => {
                    let dir = base.path().join(&path);
                    match Package::load(&dir, None, Some(base.clone()), None) {
                        Ok(package) => self.packages.push(Rc::new(package)),
                        Err(e) => {
                            warn!(
                                base = %base.name(),
                                path = %dir.display(),
                                error = %e,
                                "skipping broken sub-package"
                            );
                        }
                    }
                }
            }
        }
    }

    /// The already-loaded package rooted at a path, if any.
    #[must_use]
    pub fn package_at(&self, path: &Path) -> Option<Rc<Package>> {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.packages
            .iter()
            .find(|p| {
                std::fs::canonicalize(p.path()).unwrap_or_else(|_| p.path().to_path_buf())
                    == canonical
            })
            .cloned()
    }

    /// Loads a package from an explicit path, reusing the index when the
    /// path was seen before. Sub-packages are loaded along with it.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory does not contain a loadable
    /// package.
    pub fn get_or_load_package(&mut self, path: &Path) -> Result<Rc<Package>, ManagerError> {
        if let Some(existing) = self.package_at(path) {
            return Ok(existing);
        }
        let package = Rc::new(Package::load(path, None, None, None)?);
        self.packages.push(package.clone());
        self.load_sub_packages(&package);
        Ok(package)
    }

    /// An exact (qualified) name and version lookup.
    #[must_use]
    pub fn get_package(&self, name: &str, version: &Version) -> Option<Rc<Package>> {
        self.packages
            .iter()
            .find(|p| p.name() == name && p.version() == version)
            .cloned()
    }

    /// The best (highest) indexed version of a package matching a
    /// dependency specification.
    #[must_use]
    pub fn get_best_package(
        &self,
        name: &str,
        dep: &dub_recipe::Dependency,
    ) -> Option<Rc<Package>> {
        self.packages
            .iter()
            .filter(|p| p.name() == name && dep.matches(p.version()))
            .max_by(|a, b| a.version().cmp(b.version()))
            .cloned()
    }

    /// All indexed packages, sorted by name, then by descending version.
    #[must_use]
    pub fn packages(&self) -> Vec<Rc<Package>> {
        let mut sorted = self.packages.clone();
        sorted.sort_by(|a, b| {
            a.name()
                .cmp(&b.name())
                .then_with(|| b.version().cmp(a.version()))
        });
        sorted
    }

    /// All indexed versions of one package, descending.
    #[must_use]
    pub fn package_versions(&self, name: &str) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .packages
            .iter()
            .filter(|p| p.name() == name)
            .map(|p| p.version().clone())
            .collect();
        versions.sort_by(|a, b| b.cmp(a));
        versions.dedup();
        versions
    }

    /// Unpacks a fetched `.tar.gz` archive into a location, atomically.
    ///
    /// The destination is `<location>/packages/<name>-<version>/<name>/`.
    /// A file lock on `<name>-<version>.lock` serializes concurrent
    /// installers; after acquiring it, an existing destination is treated
    /// as a cache hit.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentInstallTimeout` when the lock cannot be
    /// acquired within 30 seconds, `PathOutsideWorkspace` for malicious
    /// archives, and `CacheCorrupt` when no recipe is found after
    /// unpacking.
    pub fn store_fetched_package(
        &mut self,
        archive: &Path,
        name: &str,
        version: &Version,
        location: PlacementLocation,
    ) -> Result<Rc<Package>, ManagerError> {
        let packages_dir = self.locations[location.index()].join(PACKAGES_DIR);
        std::fs::create_dir_all(&packages_dir)?;

        let slot = format!("{name}-{version}");
        let dest = packages_dir.join(&slot).join(name);
        let lock_path = packages_dir.join(format!("{slot}.lock"));

        let lock_file = std::fs::File::create(&lock_path)?;
        let deadline = Instant::now() + INSTALL_LOCK_TIMEOUT;
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) if Instant::now() < deadline => std::thread::sleep(INSTALL_LOCK_POLL),
                Err(_) => {
                    return Err(ManagerError::ConcurrentInstallTimeout(name.to_string()));
                }
            }
        }

        let result = self.store_locked(archive, name, version, &packages_dir, &dest);

        let _ = fs2::FileExt::unlock(&lock_file);
        let _ = std::fs::remove_file(&lock_path);
        result
    }

    fn store_locked(
        &mut self,
        archive: &Path,
        name: &str,
        version: &Version,
        packages_dir: &Path,
        dest: &Path,
    ) -> Result<Rc<Package>, ManagerError> {
        // the loser of an install race short-circuits to a cache hit
        if dest.is_dir() {
            debug!(package = name, %version, "already installed, skipping unpack");
            return self
                .load_indexed(dest, Some(version.clone()))
                .ok_or_else(|| ManagerError::CacheCorrupt(name.to_string()));
        }

        let tmp_root = packages_dir.join(format!(".tmp-{name}-{}", std::process::id()));
        if tmp_root.exists() {
            std::fs::remove_dir_all(&tmp_root)?;
        }
        std::fs::create_dir_all(&tmp_root)?;

        let unpack = || -> Result<(), ManagerError> {
            let file = std::fs::File::open(archive)?;
            let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
            for entry in tar.entries()? {
                let mut entry = entry?;
                let raw_path = entry.path()?.into_owned();
                if raw_path.is_absolute()
                    || raw_path
                        .components()
                        .any(|c| matches!(c, std::path::Component::ParentDir))
                {
                    return Err(ManagerError::PathOutsideWorkspace(
                        raw_path.to_string_lossy().into_owned(),
                    ));
                }
                entry.unpack_in(&tmp_root)?;
            }
            Ok(())
        };
        if let Err(e) = unpack() {
            let _ = std::fs::remove_dir_all(&tmp_root);
            return Err(e);
        }

        // the archive either contains the package root directly or wraps
        // it in a single top-level directory
        let source_root = if Package::find_recipe_file(&tmp_root).is_some() {
            tmp_root.clone()
        } else {
            let mut candidate = None;
            if let Ok(entries) = std::fs::read_dir(&tmp_root) {
                for entry in entries.flatten() {
                    let dir = entry.path();
                    if dir.is_dir() && Package::find_recipe_file(&dir).is_some() {
                        candidate = Some(dir);
                        break;
                    }
                }
            }
            match candidate {
                Some(dir) => dir,
                None => {
                    let _ = std::fs::remove_dir_all(&tmp_root);
                    return Err(ManagerError::CacheCorrupt(name.to_string()));
                }
            }
        };

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&source_root, dest)?;
        let _ = std::fs::remove_dir_all(&tmp_root);

        self.load_indexed(dest, Some(version.clone()))
            .ok_or_else(|| ManagerError::CacheCorrupt(name.to_string()))
    }

    /// Removes an installed package from its location and the index.
    ///
    /// # Errors
    ///
    /// Returns `NotManaged` for packages living outside every location
    /// (search-path and path-dependency packages cannot be removed).
    pub fn remove(&mut self, package: &Rc<Package>) -> Result<(), ManagerError> {
        let managed = self
            .locations
            .iter()
            .any(|loc| package.path().starts_with(loc));
        if !managed || package.is_sub_package() {
            return Err(ManagerError::NotManaged(package.name()));
        }
        // delete the whole `<name>-<version>` slot
        let slot = package
            .path()
            .parent()
            .ok_or_else(|| ManagerError::NotManaged(package.name()))?
            .to_path_buf();
        std::fs::remove_dir_all(&slot)?;
        self.packages.retain(|p| !p.path().starts_with(&slot));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::{MemorySupplier, PackageSupplier};
    use dub_recipe::Recipe;
    use std::fs;
    use tempfile::TempDir;

    struct Roots {
        _tmp: TempDir,
        local: PathBuf,
        user: PathBuf,
        system: PathBuf,
    }

    fn roots() -> Roots {
        let tmp = TempDir::new().unwrap();
        let (local, user, system) = (
            tmp.path().join("local"),
            tmp.path().join("user"),
            tmp.path().join("system"),
        );
        Roots {
            local,
            user,
            system,
            _tmp: tmp,
        }
    }

    fn manager(roots: &Roots) -> PackageManager {
        PackageManager::new(roots.local.clone(), roots.user.clone(), roots.system.clone())
    }

    fn install_fixture(root: &Path, name: &str, version: &str) {
        let dir = root
            .join(PACKAGES_DIR)
            .join(format!("{name}-{version}"))
            .join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("dub.json"),
            format!(r#"{{ "name": "{name}", "version": "{version}" }}"#),
        )
        .unwrap();
    }

    #[test]
    fn scan_and_lookup() {
        let roots = roots();
        install_fixture(&roots.user, "dep", "1.0.0");
        install_fixture(&roots.user, "dep", "1.2.0");
        install_fixture(&roots.system, "other", "0.1.0");

        let mut pm = manager(&roots);
        pm.refresh();

        assert!(pm.get_package("dep", &"1.0.0".parse().unwrap()).is_some());
        assert!(pm.get_package("dep", &"2.0.0".parse().unwrap()).is_none());
        assert_eq!(
            pm.package_versions("dep"),
            vec!["1.2.0".parse().unwrap(), "1.0.0".parse().unwrap()]
        );

        let best = pm
            .get_best_package("dep", &"^1.0.0".parse().unwrap())
            .unwrap();
        assert_eq!(best.version(), &"1.2.0".parse::<Version>().unwrap());
    }

    #[test]
    fn version_override_comes_from_directory_name() {
        let roots = roots();
        // recipe without a version field; the cache dir name supplies it
        let dir = roots
            .user
            .join(PACKAGES_DIR)
            .join("anon-2.5.0")
            .join("anon");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("dub.json"), r#"{ "name": "anon" }"#).unwrap();

        let mut pm = manager(&roots);
        pm.refresh();
        assert!(pm.get_package("anon", &"2.5.0".parse().unwrap()).is_some());
    }

    #[test]
    fn sub_packages_are_indexed() {
        let roots = roots();
        let dir = roots
            .user
            .join(PACKAGES_DIR)
            .join("base-1.0.0")
            .join("base");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("dub.json"),
            r#"{
                "name": "base",
                "version": "1.0.0",
                "subPackages": [ { "name": "sub" } ]
            }"#,
        )
        .unwrap();

        let mut pm = manager(&roots);
        pm.refresh();
        let sub = pm.get_package("base:sub", &"1.0.0".parse().unwrap()).unwrap();
        assert_eq!(sub.base_name(), "base");
    }

    #[test]
    fn store_fetched_package_unpacks_and_indexes() {
        let roots = roots();
        let mut pm = manager(&roots);
        pm.refresh();

        let mut supplier = MemorySupplier::new();
        supplier.add(
            "1.0.0".parse().unwrap(),
            Recipe {
                name: "fetched".to_string(),
                ..Recipe::default()
            },
        );
        let staging = TempDir::new().unwrap();
        let archive = supplier
            .fetch("fetched", &"1.0.0".parse().unwrap(), staging.path())
            .unwrap();

        let pkg = pm
            .store_fetched_package(
                &archive,
                "fetched",
                &"1.0.0".parse().unwrap(),
                PlacementLocation::Local,
            )
            .unwrap();
        assert_eq!(pkg.name(), "fetched");
        assert!(roots
            .local
            .join(PACKAGES_DIR)
            .join("fetched-1.0.0")
            .join("fetched")
            .join("dub.json")
            .is_file());

        // installing again is a cache hit
        let again = pm
            .store_fetched_package(
                &archive,
                "fetched",
                &"1.0.0".parse().unwrap(),
                PlacementLocation::Local,
            )
            .unwrap();
        assert_eq!(again.version(), pkg.version());
    }

    #[test]
    fn remove_deletes_the_slot() {
        let roots = roots();
        install_fixture(&roots.user, "dep", "1.0.0");
        let mut pm = manager(&roots);
        pm.refresh();

        let pkg = pm.get_package("dep", &"1.0.0".parse().unwrap()).unwrap();
        pm.remove(&pkg).unwrap();
        assert!(pm.get_package("dep", &"1.0.0".parse().unwrap()).is_none());
        assert!(!roots.user.join(PACKAGES_DIR).join("dep-1.0.0").exists());
    }

    #[test]
    fn remove_rejects_unmanaged_packages() {
        let roots = roots();
        let outside = TempDir::new().unwrap();
        fs::write(
            outside.path().join("dub.json"),
            r#"{ "name": "loose", "version": "1.0.0" }"#,
        )
        .unwrap();

        let mut pm = manager(&roots);
        let pkg = pm.get_or_load_package(outside.path()).unwrap();
        assert!(matches!(
            pm.remove(&pkg),
            Err(ManagerError::NotManaged(_))
        ));
    }

    #[test]
    fn search_paths_are_scanned() {
        let roots = roots();
        let extra = TempDir::new().unwrap();
        let dir = extra.path().join("loose");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("dub.json"),
            r#"{ "name": "loose", "version": "0.5.0" }"#,
        )
        .unwrap();

        let mut pm = manager(&roots);
        pm.add_search_path(extra.path().to_path_buf());
        pm.refresh();
        assert!(pm.get_package("loose", &"0.5.0".parse().unwrap()).is_some());
    }

    #[test]
    fn malicious_archive_is_rejected() {
        let roots = roots();
        let mut pm = manager(&roots);

        let staging = TempDir::new().unwrap();
        let archive_path = staging.path().join("evil.tar.gz");
        let file = fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        let data = b"{}";
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "../escape.json", data.as_slice())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            pm.store_fetched_package(
                &archive_path,
                "evil",
                &"1.0.0".parse().unwrap(),
                PlacementLocation::Local,
            ),
            Err(ManagerError::PathOutsideWorkspace(_))
        ));
    }
}
