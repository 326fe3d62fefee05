//! Environment variables consumed by the core.
//!
//! `DUBPATH` adds extra package search paths; `DUB_PACKAGES_USED` is a
//! comma-joined breadcrumb letting nested invocations of the builder
//! detect recursion.

use std::path::PathBuf;

/// Extra search-path list variable.
pub const DUBPATH_VAR: &str = "DUBPATH";

/// Recursion-guard breadcrumb variable.
pub const PACKAGES_USED_VAR: &str = "DUB_PACKAGES_USED";

/// Splits a `DUBPATH`-style list on `:` and `;`.
#[must_use]
pub fn split_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split([':', ';'])
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// The extra search paths from the process environment.
#[must_use]
pub fn dubpath_entries() -> Vec<PathBuf> {
    std::env::var(DUBPATH_VAR)
        .map(|v| split_path_list(&v))
        .unwrap_or_default()
}

/// Splits a breadcrumb value into package names.
#[must_use]
pub fn packages_used_from(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The breadcrumb from the process environment.
#[must_use]
pub fn packages_used() -> Vec<String> {
    packages_used_from(std::env::var(PACKAGES_USED_VAR).ok().as_deref())
}

/// Tests whether a package already appears on the breadcrumb.
#[must_use]
pub fn is_package_used(name: &str) -> bool {
    packages_used().iter().any(|p| p == name)
}

/// The breadcrumb value for child process environments, with `name`
/// appended (once).
#[must_use]
pub fn extend_packages_used(value: Option<&str>, name: &str) -> String {
    let mut used = packages_used_from(value);
    if !used.iter().any(|p| p == name) {
        used.push(name.to_string());
    }
    used.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_list_splitting() {
        assert_eq!(
            split_path_list("/a:/b;/c"),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
        assert!(split_path_list("").is_empty());
        assert_eq!(split_path_list("::/x;"), vec![PathBuf::from("/x")]);
    }

    #[test]
    fn breadcrumb_parsing() {
        assert_eq!(packages_used_from(Some("a,b")), vec!["a", "b"]);
        assert!(packages_used_from(None).is_empty());
        assert!(packages_used_from(Some("")).is_empty());
    }

    #[test]
    fn breadcrumb_extension() {
        assert_eq!(extend_packages_used(None, "pkg"), "pkg");
        assert_eq!(extend_packages_used(Some("a,b"), "pkg"), "a,b,pkg");
        assert_eq!(extend_packages_used(Some("a,pkg"), "pkg"), "a,pkg");
    }
}
