//! The registry seam: suppliers report available versions and hand out
//! package archives.
//!
//! Transport (HTTP clients, mirrors, authentication) is out of scope for
//! the core; anything that can list versions and produce a `.tar.gz` for
//! a version can act as a supplier.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use dub_recipe::{serialize_recipe, Recipe, Version, DEFAULT_RECIPE_FILE};

/// Errors reported by package suppliers.
#[derive(Error, Debug)]
pub enum SupplierError {
    #[error("package '{0}' is not known to the registry")]
    UnknownPackage(String),

    #[error("package '{package}' has no version {version}")]
    UnknownVersion { package: String, version: String },

    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A source of packages: a remote registry, a mirror, or a test fixture.
pub trait PackageSupplier {
    /// Human-readable description for diagnostics.
    fn description(&self) -> String;

    /// All known versions of a package, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPackage` for packages this supplier does not carry.
    fn versions(&self, package: &str) -> Result<Vec<Version>, SupplierError>;

    /// Produces the `.tar.gz` archive of a package version inside
    /// `dest_dir` and returns the archive path.
    ///
    /// # Errors
    ///
    /// Returns an error when the package or version is unknown or the
    /// archive cannot be produced.
    fn fetch(
        &self,
        package: &str,
        version: &Version,
        dest_dir: &Path,
    ) -> Result<PathBuf, SupplierError>;
}

/// An in-memory supplier serving recipes it was seeded with.
///
/// Fetch materializes a minimal package archive (recipe only). Used by
/// the test suites and useful for embedding.
#[derive(Debug, Default)]
pub struct MemorySupplier {
    packages: BTreeMap<String, BTreeMap<Version, Recipe>>,
}

impl MemorySupplier {
    /// An empty supplier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a recipe under a version.
    pub fn add(&mut self, version: Version, recipe: Recipe) {
        self.packages
            .entry(recipe.name.clone())
            .or_default()
            .insert(version, recipe);
    }
}

impl PackageSupplier for MemorySupplier {
    fn description(&self) -> String {
        "memory registry".to_string()
    }

    fn versions(&self, package: &str) -> Result<Vec<Version>, SupplierError> {
        self.packages
            .get(package)
            .map(|versions| versions.keys().cloned().collect())
            .ok_or_else(|| SupplierError::UnknownPackage(package.to_string()))
    }

    fn fetch(
        &self,
        package: &str,
        version: &Version,
        dest_dir: &Path,
    ) -> Result<PathBuf, SupplierError> {
        let recipe = self
            .packages
            .get(package)
            .ok_or_else(|| SupplierError::UnknownPackage(package.to_string()))?
            .get(version)
            .ok_or_else(|| SupplierError::UnknownVersion {
                package: package.to_string(),
                version: version.to_string(),
            })?;

        let mut recipe = recipe.clone();
        recipe.version = Some(version.to_string());
        let recipe_text = serialize_recipe(&recipe, DEFAULT_RECIPE_FILE);

        let archive_path = dest_dir.join(format!("{package}-{version}.tar.gz"));
        let file = std::fs::File::create(&archive_path)?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_size(recipe_text.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(
            &mut header,
            format!("{package}/{DEFAULT_RECIPE_FILE}"),
            recipe_text.as_bytes(),
        )?;
        builder.into_inner()?.finish()?;
        Ok(archive_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(name: &str) -> Recipe {
        Recipe {
            name: name.to_string(),
            ..Recipe::default()
        }
    }

    #[test]
    fn versions_listing() {
        let mut supplier = MemorySupplier::new();
        supplier.add("1.0.0".parse().unwrap(), recipe("demo"));
        supplier.add("1.2.0".parse().unwrap(), recipe("demo"));

        let versions = supplier.versions("demo").unwrap();
        assert_eq!(versions.len(), 2);
        assert!(matches!(
            supplier.versions("absent"),
            Err(SupplierError::UnknownPackage(_))
        ));
    }

    #[test]
    fn fetch_produces_an_unpackable_archive() {
        let mut supplier = MemorySupplier::new();
        supplier.add("1.0.0".parse().unwrap(), recipe("demo"));

        let tmp = tempfile::TempDir::new().unwrap();
        let archive = supplier
            .fetch("demo", &"1.0.0".parse().unwrap(), tmp.path())
            .unwrap();

        let file = std::fs::File::open(archive).unwrap();
        let mut reader = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["demo/dub.json"]);
    }

    #[test]
    fn fetch_unknown_version() {
        let mut supplier = MemorySupplier::new();
        supplier.add("1.0.0".parse().unwrap(), recipe("demo"));
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            supplier.fetch("demo", &"2.0.0".parse().unwrap(), tmp.path()),
            Err(SupplierError::UnknownVersion { .. })
        ));
    }
}
