//! Target platform description and platform-filter matching.
//!
//! Build-settings fields and configurations can be restricted to matching
//! platforms with a hyphenated filter suffix such as `linux`,
//! `windows-x86_64` or `posix-x86_64-ldc`. Every token of a filter must
//! match one of the platform's identifiers for the filter to apply.

/// The platform a build targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlatform {
    /// Operating-system identifiers, most specific first
    /// (e.g. `["linux", "posix"]`).
    pub platform: Vec<String>,

    /// Architecture identifiers (e.g. `["x86_64"]`).
    pub architecture: Vec<String>,

    /// Canonical compiler name (e.g. `"dmd"`).
    pub compiler: String,
}

impl BuildPlatform {
    /// Creates a platform from identifier lists.
    #[must_use]
    pub fn new(
        platform: impl IntoIterator<Item = impl Into<String>>,
        architecture: impl IntoIterator<Item = impl Into<String>>,
        compiler: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into_iter().map(Into::into).collect(),
            architecture: architecture.into_iter().map(Into::into).collect(),
            compiler: compiler.into(),
        }
    }

    /// Tests a platform-filter suffix against this platform.
    ///
    /// The empty filter matches everything. A leading `-` is tolerated so
    /// raw key suffixes can be passed unchanged. The pseudo-token `any`
    /// always matches.
    #[must_use]
    pub fn matches_specification(&self, specification: &str) -> bool {
        let spec = specification.strip_prefix('-').unwrap_or(specification);
        if spec.is_empty() {
            return true;
        }
        spec.split('-').all(|token| {
            token == "any"
                || self.platform.iter().any(|p| p == token)
                || self.architecture.iter().any(|a| a == token)
                || self.compiler == token
        })
    }
}
