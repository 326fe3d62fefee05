//! Package versions: numeric semantic versions, branch versions and sentinels.
//!
//! A version is either a numeric `MAJOR.MINOR.PATCH[-PRE][+BUILD]` semantic
//! version, a branch (`~branch-name`), or the `unknown` sentinel used for
//! packages whose version could not be determined. The total order places
//! every branch after every numeric version, and a pre-release before the
//! release it precedes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing a version string.
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("empty branch name in version '~'")]
    EmptyBranch,

    #[error("invalid version '{version}': {reason}")]
    Invalid { version: String, reason: String },
}

/// A package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// A numeric semantic version.
    Release(semver::Version),

    /// A branch version (`~master`, `~develop`, ...).
    Branch(String),

    /// Version could not be determined.
    Unknown,
}

impl Version {
    /// The `~master` branch version.
    #[must_use]
    pub fn master() -> Self {
        Self::Branch("master".to_string())
    }

    /// The smallest possible numeric version (`0.0.0`).
    #[must_use]
    pub fn min_release() -> Self {
        Self::Release(semver::Version::new(0, 0, 0))
    }

    /// The largest representable numeric version.
    #[must_use]
    pub fn max_release() -> Self {
        Self::Release(semver::Version::new(u64::MAX, u64::MAX, u64::MAX))
    }

    /// Returns true for branch versions (`~...`).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Branch(_))
    }

    /// Returns true for the `~master` branch.
    #[must_use]
    pub fn is_master(&self) -> bool {
        matches!(self, Self::Branch(b) if b == "master")
    }

    /// Returns true for the `unknown` sentinel.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Returns true for numeric versions carrying a pre-release suffix.
    #[must_use]
    pub fn is_pre_release(&self) -> bool {
        matches!(self, Self::Release(v) if !v.pre.is_empty())
    }

    /// The numeric core, if this is a numeric version.
    #[must_use]
    pub fn release(&self) -> Option<&semver::Version> {
        match self {
            Self::Release(v) => Some(v),
            _ => None,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(branch) = s.strip_prefix('~') {
            if branch.is_empty() {
                return Err(VersionError::EmptyBranch);
            }
            return Ok(Self::Branch(branch.to_string()));
        }
        if s == "unknown" {
            return Ok(Self::Unknown);
        }
        semver::Version::parse(s)
            .map(Self::Release)
            .map_err(|e| VersionError::Invalid {
                version: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release(v) => write!(f, "{v}"),
            Self::Branch(b) => write!(f, "~{b}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        use Version::{Branch, Release, Unknown};
        match (self, other) {
            (Unknown, Unknown) => Ordering::Equal,
            (Unknown, _) => Ordering::Less,
            (_, Unknown) => Ordering::Greater,
            (Release(a), Release(b)) => a.cmp(b),
            // branches sort after all numeric versions
            (Release(_), Branch(_)) => Ordering::Less,
            (Branch(_), Release(_)) => Ordering::Greater,
            (Branch(a), Branch(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn parse_release() {
        assert_eq!(v("1.2.3"), Version::Release(semver::Version::new(1, 2, 3)));
        assert!(v("1.0.0-beta.1").is_pre_release());
        assert!(!v("1.0.0").is_pre_release());
    }

    #[test]
    fn parse_branch() {
        assert_eq!(v("~master"), Version::master());
        assert!(v("~develop").is_branch());
        assert!("~".parse::<Version>().is_err());
    }

    #[test]
    fn parse_unknown() {
        assert!(v("unknown").is_unknown());
        assert!("not a version".parse::<Version>().is_err());
    }

    #[test]
    fn ordering_releases() {
        assert!(v("1.0.0") < v("1.0.1"));
        assert!(v("1.9.0") < v("1.10.0"));
        assert!(v("2.0.0-rc.1") < v("2.0.0"));
        assert!(v("2.0.0-rc.1") < v("2.0.0-rc.2"));
    }

    #[test]
    fn branches_sort_after_releases() {
        assert!(v("99.0.0") < v("~master"));
        assert!(v("~develop") < v("~master"));
        assert!(Version::max_release() < v("~anything"));
    }

    #[test]
    fn display_round_trip() {
        for s in ["1.2.3", "1.0.0-beta.2+build.5", "~master", "unknown"] {
            assert_eq!(v(s).to_string(), s);
        }
    }
}
