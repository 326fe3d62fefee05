//! Persisted dependency selections (`dub.selections.json`).
//!
//! Selections pin every resolved dependency of a project to a concrete
//! version, branch or path, so repeated builds see the same dependency
//! set until an explicit upgrade.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use dub_recipe::json::{dependency_from_json, dependency_to_json};
use dub_recipe::Dependency;

/// The selections file name, next to the root package recipe.
pub const SELECTIONS_FILE: &str = "dub.selections.json";

/// The only supported on-disk format version.
pub const FILE_VERSION: u64 = 1;

/// Errors that can occur when working with the selections file.
#[derive(Error, Debug)]
pub enum SelectionsError {
    #[error("unsupported selections file version {0} (expected {FILE_VERSION})")]
    VersionMismatch(u64),

    #[error("malformed selections file: {0}")]
    Malformed(String),

    #[error("failed to access selections file: {0}")]
    Io(#[from] io::Error),
}

/// A package-name to dependency pin map with a dirty flag.
#[derive(Debug, Default)]
pub struct SelectedVersions {
    selections: BTreeMap<String, Dependency>,
    dirty: bool,
    from_file: bool,
}

impl SelectedVersions {
    /// An empty, clean selection set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads selections from a file.
    ///
    /// A missing file yields the empty set; a malformed file degrades to
    /// the empty set with a warning.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` for a well-formed file with an
    /// unsupported `fileVersion`; that one must be rejected rather than
    /// ignored.
    pub fn load(path: &Path) -> Result<Self, SelectionsError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        match Self::parse(&text) {
            Ok(mut selections) => {
                selections.from_file = true;
                Ok(selections)
            }
            Err(SelectionsError::VersionMismatch(v)) => {
                Err(SelectionsError::VersionMismatch(v))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed selections file");
                Ok(Self::new())
            }
        }
    }

    /// Parses the JSON selections document.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for structural problems and `VersionMismatch`
    /// for an unsupported `fileVersion`.
    pub fn parse(text: &str) -> Result<Self, SelectionsError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SelectionsError::Malformed(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| SelectionsError::Malformed("expected an object".to_string()))?;

        let version = obj
            .get("fileVersion")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| SelectionsError::Malformed("missing 'fileVersion'".to_string()))?;
        if version != FILE_VERSION {
            return Err(SelectionsError::VersionMismatch(version));
        }

        let mut selections = BTreeMap::new();
        if let Some(versions) = obj.get("versions") {
            let versions = versions
                .as_object()
                .ok_or_else(|| SelectionsError::Malformed("'versions' must be an object".to_string()))?;
            for (name, v) in versions {
                let dep = dependency_from_json(v, name)
                    .map_err(|e| SelectionsError::Malformed(e.to_string()))?;
                selections.insert(name.clone(), dep);
            }
        }
        Ok(Self {
            selections,
            dirty: false,
            from_file: false,
        })
    }

    /// Saves the selections atomically (write to temporary, then rename)
    /// and clears the dirty flag.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn save(&mut self, path: &Path) -> Result<(), SelectionsError> {
        let mut versions = serde_json::Map::new();
        for (name, dep) in &self.selections {
            versions.insert(name.clone(), dependency_to_json(dep));
        }
        let mut doc = serde_json::Map::new();
        doc.insert("fileVersion".to_string(), FILE_VERSION.into());
        doc.insert("versions".to_string(), serde_json::Value::Object(versions));
        let text = serde_json::to_string_pretty(&serde_json::Value::Object(doc))
            .map_err(|e| SelectionsError::Malformed(e.to_string()))?;

        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        self.dirty = false;
        self.from_file = true;
        Ok(())
    }

    /// Pins a package. No-op flagwise if the pin is unchanged.
    pub fn select(&mut self, name: impl Into<String>, dep: Dependency) {
        let name = name.into();
        if self.selections.get(&name) != Some(&dep) {
            self.selections.insert(name, dep);
            self.dirty = true;
        }
    }

    /// Removes a pin.
    pub fn deselect(&mut self, name: &str) {
        if self.selections.remove(name).is_some() {
            self.dirty = true;
        }
    }

    /// The pin for a package, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.selections.get(name)
    }

    /// Tests whether a package is pinned.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.selections.contains_key(name)
    }

    /// All pins, by package name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dependency)> {
        self.selections.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// The pinned package names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.selections.keys().map(String::as_str)
    }

    /// True when there are unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True when these selections were read from (or saved to) disk, i.e.
    /// a missing pin means the package was deliberately deselected.
    #[must_use]
    pub fn is_from_file(&self) -> bool {
        self.from_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dub_recipe::Version;
    use tempfile::TempDir;

    #[test]
    fn parse_versions_and_paths() {
        let text = r#"{
            "fileVersion": 1,
            "versions": {
                "pinned": "1.2.3",
                "branchy": "~master",
                "local": { "path": "../local" }
            }
        }"#;
        let s = SelectedVersions::parse(text).unwrap();
        assert_eq!(
            s.get("pinned").unwrap().exact_version(),
            Some("1.2.3".parse().unwrap())
        );
        assert_eq!(
            s.get("branchy").unwrap().exact_version(),
            Some(Version::master())
        );
        assert!(s.get("local").unwrap().path_spec().is_some());
    }

    #[test]
    fn reject_wrong_file_version() {
        let text = r#"{ "fileVersion": 2, "versions": {} }"#;
        assert!(matches!(
            SelectedVersions::parse(text),
            Err(SelectionsError::VersionMismatch(2))
        ));
    }

    #[test]
    fn malformed_file_degrades_to_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SELECTIONS_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let s = SelectedVersions::load(&path).unwrap();
        assert_eq!(s.iter().count(), 0);
    }

    #[test]
    fn missing_file_is_empty_and_not_from_file() {
        let tmp = TempDir::new().unwrap();
        let s = SelectedVersions::load(&tmp.path().join(SELECTIONS_FILE)).unwrap();
        assert!(!s.is_from_file());
        assert!(!s.is_dirty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SELECTIONS_FILE);

        let mut s = SelectedVersions::new();
        s.select("dep", Dependency::exact("1.0.0".parse().unwrap()));
        s.select("local", Dependency::path("../local"));
        assert!(s.is_dirty());
        s.save(&path).unwrap();
        assert!(!s.is_dirty());

        let loaded = SelectedVersions::load(&path).unwrap();
        assert!(loaded.is_from_file());
        assert_eq!(
            loaded.get("dep").unwrap().exact_version(),
            Some("1.0.0".parse().unwrap())
        );
        assert_eq!(
            loaded.get("local").unwrap().path_spec(),
            s.get("local").unwrap().path_spec()
        );
    }

    #[test]
    fn dirty_tracking() {
        let mut s = SelectedVersions::new();
        let dep = Dependency::exact("1.0.0".parse().unwrap());
        s.select("a", dep.clone());
        assert!(s.is_dirty());
        let mut s2 = SelectedVersions::new();
        s2.select("a", dep.clone());
        s2.dirty = false;
        s2.select("a", dep);
        assert!(!s2.is_dirty());
        s2.deselect("a");
        assert!(s2.is_dirty());
    }
}
