//! Dependency specifications: version ranges, branches and filesystem paths.
//!
//! A dependency is a tagged variant over three shapes with uniform
//! `matches`/`merge` operations:
//!
//! - a numeric version range (`">=1.0.0 <2.0.0"`, `"^1.2.3"`, `"~>1.2"`,
//!   `"==1.2.3"`, a bare exact version, or `"*"`),
//! - a branch (`"~master"`),
//! - a filesystem path, absolute or relative to the referring package.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::version::Version;

/// Errors that can occur when parsing a dependency specification.
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("invalid version specification '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },
}

fn invalid(spec: &str, reason: impl Into<String>) -> DependencyError {
    DependencyError::InvalidSpec {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

/// An interval of numeric versions.
///
/// Bounds are numeric versions; each bound is independently inclusive or
/// exclusive. An exact constraint is a range with identical, inclusive
/// bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Version,
    max: Version,
    inclusive_min: bool,
    inclusive_max: bool,
}

impl VersionRange {
    /// The range admitting every numeric version.
    #[must_use]
    pub fn any() -> Self {
        Self {
            min: Version::min_release(),
            max: Version::max_release(),
            inclusive_min: true,
            inclusive_max: true,
        }
    }

    /// A range matching exactly one version.
    #[must_use]
    pub fn exact(version: Version) -> Self {
        Self {
            min: version.clone(),
            max: version,
            inclusive_min: true,
            inclusive_max: true,
        }
    }

    /// Builds a half-open interval `[min, max)`.
    #[must_use]
    pub fn bounded(min: Version, max: Version) -> Self {
        Self {
            min,
            max,
            inclusive_min: true,
            inclusive_max: false,
        }
    }

    /// Returns true if this range admits every numeric version.
    #[must_use]
    pub fn is_any(&self) -> bool {
        *self == Self::any()
    }

    /// Returns the exactly pinned version, if the range is a point.
    #[must_use]
    pub fn exact_version(&self) -> Option<&Version> {
        (self.min == self.max && self.inclusive_min && self.inclusive_max).then_some(&self.min)
    }

    /// Tests whether a version lies within the range.
    ///
    /// Branch versions never match a range, except that the `*` range
    /// admits them.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        if version.is_branch() {
            return self.is_any();
        }
        if version.is_unknown() {
            return false;
        }
        let lower_ok = if self.inclusive_min {
            *version >= self.min
        } else {
            *version > self.min
        };
        let upper_ok = if self.inclusive_max {
            *version <= self.max
        } else {
            *version < self.max
        };
        lower_ok && upper_ok
    }

    /// Intersects two ranges. Returns `None` when the intersection is empty.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Option<Self> {
        let (min, inclusive_min) = match self.min.cmp(&other.min) {
            std::cmp::Ordering::Greater => (self.min.clone(), self.inclusive_min),
            std::cmp::Ordering::Less => (other.min.clone(), other.inclusive_min),
            std::cmp::Ordering::Equal => {
                (self.min.clone(), self.inclusive_min && other.inclusive_min)
            }
        };
        let (max, inclusive_max) = match self.max.cmp(&other.max) {
            std::cmp::Ordering::Less => (self.max.clone(), self.inclusive_max),
            std::cmp::Ordering::Greater => (other.max.clone(), other.inclusive_max),
            std::cmp::Ordering::Equal => {
                (self.max.clone(), self.inclusive_max && other.inclusive_max)
            }
        };
        let valid = match min.cmp(&max) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => inclusive_min && inclusive_max,
            std::cmp::Ordering::Greater => false,
        };
        valid.then_some(Self {
            min,
            max,
            inclusive_min,
            inclusive_max,
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "*");
        }
        if let Some(v) = self.exact_version() {
            return write!(f, "{v}");
        }
        write!(f, "{}{}", if self.inclusive_min { ">=" } else { ">" }, self.min)?;
        if !(self.max == Version::max_release() && self.inclusive_max) {
            write!(f, " {}{}", if self.inclusive_max { "<=" } else { "<" }, self.max)?;
        }
        Ok(())
    }
}

impl FromStr for VersionRange {
    type Err = DependencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }
        if let Some(rest) = s.strip_prefix("~>") {
            return parse_approximate(s, rest);
        }
        if let Some(rest) = s.strip_prefix('^') {
            return parse_caret(s, rest);
        }
        if let Some(rest) = s.strip_prefix("==").or_else(|| s.strip_prefix('=')) {
            let v = parse_release(s, rest.trim())?;
            return Ok(Self::exact(v));
        }
        if s.starts_with('>') || s.starts_with('<') {
            let mut range = Self::any();
            for part in s.split_whitespace() {
                let comparator = parse_comparator(s, part)?;
                range = range
                    .merge(&comparator)
                    .ok_or_else(|| invalid(s, "bounds describe an empty range"))?;
            }
            return Ok(range);
        }
        // a bare version pins exactly
        let v = parse_release(s, s)?;
        Ok(Self::exact(v))
    }
}

fn parse_release(spec: &str, text: &str) -> Result<Version, DependencyError> {
    let v: Version = text
        .parse()
        .map_err(|e: crate::version::VersionError| invalid(spec, e.to_string()))?;
    if v.is_branch() || v.is_unknown() {
        return Err(invalid(spec, "expected a numeric version"));
    }
    Ok(v)
}

fn parse_comparator(spec: &str, part: &str) -> Result<VersionRange, DependencyError> {
    let (op, rest) = if let Some(r) = part.strip_prefix(">=") {
        (">=", r)
    } else if let Some(r) = part.strip_prefix("<=") {
        ("<=", r)
    } else if let Some(r) = part.strip_prefix('>') {
        (">", r)
    } else if let Some(r) = part.strip_prefix('<') {
        ("<", r)
    } else {
        return Err(invalid(spec, format!("unexpected term '{part}'")));
    };
    let v = parse_release(spec, rest)?;
    let mut range = VersionRange::any();
    match op {
        ">=" => {
            range.min = v;
        }
        ">" => {
            range.min = v;
            range.inclusive_min = false;
        }
        "<=" => {
            range.max = v;
        }
        "<" => {
            range.max = v;
            range.inclusive_max = false;
        }
        _ => unreachable!(),
    }
    Ok(range)
}

/// Splits a possibly partial `M[.m[.p]]` version into numeric components.
fn split_components(spec: &str, text: &str) -> Result<Vec<u64>, DependencyError> {
    let core = text.split(['-', '+']).next().unwrap_or(text);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid(spec, "expected 1 to 3 version components"));
    }
    parts
        .iter()
        .map(|p| {
            p.parse::<u64>()
                .map_err(|_| invalid(spec, format!("invalid version component '{p}'")))
        })
        .collect()
}

fn release(major: u64, minor: u64, patch: u64) -> Version {
    Version::Release(semver::Version::new(major, minor, patch))
}

/// `~>1.2.3` admits `[1.2.3, 1.3.0)`; `~>1.2` admits `[1.2.0, 2.0.0)`.
fn parse_approximate(spec: &str, rest: &str) -> Result<VersionRange, DependencyError> {
    let rest = rest.trim();
    let comps = split_components(spec, rest)?;
    let min = if comps.len() == 3 {
        parse_release(spec, rest)?
    } else {
        release(
            comps[0],
            comps.get(1).copied().unwrap_or(0),
            comps.get(2).copied().unwrap_or(0),
        )
    };
    let max = match comps.len() {
        3 => release(comps[0], comps[1] + 1, 0),
        _ => release(comps[0] + 1, 0, 0),
    };
    Ok(VersionRange::bounded(min, max))
}

/// Semver caret: the leftmost non-zero component is fixed.
fn parse_caret(spec: &str, rest: &str) -> Result<VersionRange, DependencyError> {
    let rest = rest.trim();
    let comps = split_components(spec, rest)?;
    let (major, minor, patch) = (
        comps[0],
        comps.get(1).copied().unwrap_or(0),
        comps.get(2).copied().unwrap_or(0),
    );
    let min = if comps.len() == 3 {
        parse_release(spec, rest)?
    } else {
        release(major, minor, patch)
    };
    let max = if major > 0 {
        release(major + 1, 0, 0)
    } else if minor > 0 {
        release(0, minor + 1, 0)
    } else {
        release(0, 0, patch + 1)
    };
    Ok(VersionRange::bounded(min, max))
}

/// The source shape of a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// A numeric version range.
    Range(VersionRange),

    /// A specific branch (`~master`).
    Branch(String),

    /// A filesystem path, absolute or relative to the referring package.
    Path(PathBuf),
}

/// A dependency declaration: a source shape plus edge attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// What satisfies the dependency.
    pub spec: DependencySpec,

    /// Optional dependencies may remain unselected.
    pub optional: bool,

    /// Only meaningful together with `optional`: selected unless the
    /// existing selection state deselected it.
    pub is_default: bool,
}

impl Dependency {
    /// A dependency admitting any version.
    #[must_use]
    pub fn any() -> Self {
        Self::from_spec(DependencySpec::Range(VersionRange::any()))
    }

    /// A dependency pinned to exactly one version. Branch versions pin the
    /// branch.
    #[must_use]
    pub fn exact(version: Version) -> Self {
        match version {
            Version::Branch(b) => Self::from_spec(DependencySpec::Branch(b)),
            v => Self::from_spec(DependencySpec::Range(VersionRange::exact(v))),
        }
    }

    /// A path dependency.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::from_spec(DependencySpec::Path(path.into()))
    }

    /// Wraps a spec with default edge attributes.
    #[must_use]
    pub fn from_spec(spec: DependencySpec) -> Self {
        Self {
            spec,
            optional: false,
            is_default: false,
        }
    }

    /// The version range, if this is a range dependency.
    #[must_use]
    pub fn range(&self) -> Option<&VersionRange> {
        match &self.spec {
            DependencySpec::Range(r) => Some(r),
            _ => None,
        }
    }

    /// The path, if this is a path dependency.
    #[must_use]
    pub fn path_spec(&self) -> Option<&std::path::Path> {
        match &self.spec {
            DependencySpec::Path(p) => Some(p),
            _ => None,
        }
    }

    /// The exactly pinned version, if any: a point range or a branch.
    #[must_use]
    pub fn exact_version(&self) -> Option<Version> {
        match &self.spec {
            DependencySpec::Range(r) => r.exact_version().cloned(),
            DependencySpec::Branch(b) => Some(Version::Branch(b.clone())),
            DependencySpec::Path(_) => None,
        }
    }

    /// Tests whether a concrete version satisfies this dependency.
    ///
    /// Path dependencies are satisfied by whatever is found at the path and
    /// therefore match any version.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match &self.spec {
            DependencySpec::Range(r) => r.matches(version),
            DependencySpec::Branch(b) => matches!(version, Version::Branch(v) if v == b),
            DependencySpec::Path(_) => true,
        }
    }

    /// Intersects two dependencies on the same package.
    ///
    /// Returns `None` when no version can satisfy both. The `*` range is
    /// neutral and yields the other side. Edge attributes combine so that
    /// the result is optional only if both sides are, and default if either
    /// side is.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Option<Self> {
        let spec = match (&self.spec, &other.spec) {
            (DependencySpec::Range(a), DependencySpec::Range(b)) => {
                DependencySpec::Range(a.merge(b)?)
            }
            (DependencySpec::Branch(a), DependencySpec::Branch(b)) if a == b => {
                DependencySpec::Branch(a.clone())
            }
            (DependencySpec::Branch(b), DependencySpec::Range(r))
            | (DependencySpec::Range(r), DependencySpec::Branch(b))
                if r.is_any() =>
            {
                DependencySpec::Branch(b.clone())
            }
            (DependencySpec::Path(a), DependencySpec::Path(b)) if a == b => {
                DependencySpec::Path(a.clone())
            }
            (DependencySpec::Path(p), DependencySpec::Range(r))
            | (DependencySpec::Range(r), DependencySpec::Path(p))
                if r.is_any() =>
            {
                DependencySpec::Path(p.clone())
            }
            _ => return None,
        };
        Some(Self {
            spec,
            optional: self.optional && other.optional,
            is_default: self.is_default || other.is_default,
        })
    }
}

impl FromStr for Dependency {
    type Err = DependencyError;

    /// Parses a textual version specification (never a path; paths come
    /// from structured recipe fields).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(branch) = s.strip_prefix('~') {
            // `~>` is a range operator, a plain `~` prefixes a branch
            if !branch.starts_with('>') {
                if branch.is_empty() {
                    return Err(invalid(s, "empty branch name"));
                }
                return Ok(Self::from_spec(DependencySpec::Branch(branch.to_string())));
            }
        }
        let range: VersionRange = s.parse()?;
        Ok(Self::from_spec(DependencySpec::Range(range)))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spec {
            DependencySpec::Range(r) => write!(f, "{r}"),
            DependencySpec::Branch(b) => write!(f, "~{b}"),
            DependencySpec::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ver(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn dep(s: &str) -> Dependency {
        s.parse().unwrap()
    }

    #[test]
    fn bare_version_pins_exactly() {
        let d = dep("1.2.3");
        assert!(d.matches(&ver("1.2.3")));
        assert!(!d.matches(&ver("1.2.4")));
        assert_eq!(d.exact_version(), Some(ver("1.2.3")));
    }

    #[test]
    fn caret_range() {
        let d = dep("^1.2.3");
        assert!(d.matches(&ver("1.2.3")));
        assert!(d.matches(&ver("1.9.0")));
        assert!(!d.matches(&ver("2.0.0")));
        assert!(!d.matches(&ver("1.2.2")));

        let zero = dep("^0.2.3");
        assert!(zero.matches(&ver("0.2.9")));
        assert!(!zero.matches(&ver("0.3.0")));
    }

    #[test]
    fn approximate_range() {
        let patch = dep("~>1.2.3");
        assert!(patch.matches(&ver("1.2.9")));
        assert!(!patch.matches(&ver("1.3.0")));

        let minor = dep("~>1.2");
        assert!(minor.matches(&ver("1.9.0")));
        assert!(!minor.matches(&ver("2.0.0")));
    }

    #[test]
    fn explicit_bounds() {
        let d = dep(">=1.0.0 <2.0.0");
        assert!(d.matches(&ver("1.0.0")));
        assert!(d.matches(&ver("1.9.9")));
        assert!(!d.matches(&ver("2.0.0")));
        assert!(!d.matches(&ver("0.9.0")));

        assert!("<1.0.0 >=2.0.0".parse::<VersionRange>().is_err());
    }

    #[test]
    fn wildcard_matches_branches_too() {
        let any = dep("*");
        assert!(any.matches(&ver("0.0.1")));
        assert!(any.matches(&ver("~master")));

        assert!(!dep(">=1.0.0").matches(&ver("~master")));
    }

    #[test]
    fn branch_spec() {
        let d = dep("~master");
        assert!(d.matches(&Version::master()));
        assert!(!d.matches(&ver("~develop")));
        assert!(!d.matches(&ver("1.0.0")));
    }

    #[test]
    fn merge_intersects_ranges() {
        let merged = dep("^1.0.0").merge(&dep("^1.2.0")).unwrap();
        assert!(merged.matches(&ver("1.2.0")));
        assert!(!merged.matches(&ver("1.1.9")));

        assert!(dep("^1.0.0").merge(&dep("^2.0.0")).is_none());
    }

    #[test]
    fn merge_any_is_neutral() {
        let branch = dep("~master");
        assert_eq!(dep("*").merge(&branch), Some(branch.clone()));

        let path = Dependency::path("../local");
        assert_eq!(dep("*").merge(&path), Some(path.clone()));
        assert!(dep(">=1.0.0").merge(&path).is_none());
    }

    #[test]
    fn merge_edge_attributes() {
        let mut a = dep("^1.0.0");
        a.optional = true;
        a.is_default = true;
        let b = dep("^1.1.0");
        let merged = a.merge(&b).unwrap();
        assert!(!merged.optional);
        assert!(merged.is_default);
    }

    #[test]
    fn display_round_trip() {
        for s in ["*", "1.2.3", ">=1.0.0 <2.0.0", ">=1.0.0", "~master"] {
            assert_eq!(dep(s).to_string(), s);
            assert_eq!(dep(&dep(s).to_string()), dep(s));
        }
    }
}
