//! SCM-based version inference for packages without a recorded version.
//!
//! `git describe --long --tags` output of the form `v<semver>-<N>-g<hash>`
//! is turned into `<semver>` (tagged commit) or
//! `<semver>+commit.<N>.<hash>` (N commits past the tag). Without a
//! usable tag the current branch name is used as `~<branch>`.

use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

use dub_recipe::Version;

/// Errors that can occur during SCM version inference.
#[derive(Error, Debug)]
pub enum ScmError {
    #[error("failed to invoke git: {0}")]
    Invoke(#[from] std::io::Error),

    #[error("git exited with an error: {0}")]
    Failed(String),

    #[error("git output is not usable for versioning")]
    NoVersion,
}

/// On-disk shape of the per-package version cache (`.dub/version.json`).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct VersionCache {
    version: String,
    commit: String,
}

fn run_git(root: &Path, args: &[&str]) -> Result<String, ScmError> {
    let output = Command::new("git").args(args).current_dir(root).output()?;
    if !output.status.success() {
        return Err(ScmError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Turns `git describe --long --tags` output into a version.
///
/// Returns `None` when the tag does not carry a `v<semver>` name.
#[must_use]
pub fn parse_described(description: &str) -> Option<Version> {
    let (rest, hash) = description.rsplit_once('-')?;
    let (tag, commit_count) = rest.rsplit_once('-')?;
    let count: u64 = commit_count.parse().ok()?;

    let semver_text = tag.strip_prefix('v')?;
    let tagged: Version = semver_text.parse().ok()?;
    if tagged.is_branch() || tagged.is_unknown() {
        return None;
    }
    if count == 0 {
        return Some(tagged);
    }
    // a '+' in the tag means the build-metadata section is already open,
    // so further identifiers are joined with '.'
    let separator = if semver_text.contains('+') { '.' } else { '+' };
    format!("{semver_text}{separator}commit.{count}.{hash}")
        .parse()
        .ok()
}

/// Infers the version of the working tree at `root`.
///
/// # Errors
///
/// Returns an error when git is unavailable, fails, or its output cannot
/// be turned into a version.
pub fn determine_version(root: &Path) -> Result<Version, ScmError> {
    // spawning git is slow enough on windows to justify a cache keyed by
    // the HEAD commit
    let head = if cfg!(windows) {
        run_git(root, &["rev-parse", "HEAD"]).ok()
    } else {
        None
    };
    let cache_path = root.join(".dub").join("version.json");
    if let Some(head) = &head {
        if let Some(version) = read_cache(&cache_path, head) {
            debug!(%version, "using cached SCM version");
            return Ok(version);
        }
    }

    let version = match run_git(root, &["describe", "--long", "--tags"]) {
        Ok(description) => parse_described(&description).ok_or(ScmError::NoVersion),
        Err(e) => {
            debug!(error = %e, "git describe failed, falling back to branch name");
            Err(ScmError::NoVersion)
        }
    }
    .or_else(|_| branch_version(root))?;

    if let Some(head) = &head {
        write_cache(&cache_path, head, &version);
    }
    Ok(version)
}

/// Infers a version, degrading to `~master` with a warning when the SCM
/// is unavailable.
#[must_use]
pub fn determine_version_with_fallback(root: &Path) -> Version {
    match determine_version(root) {
        Ok(version) => version,
        Err(e) => {
            warn!(
                path = %root.display(),
                error = %e,
                "could not determine version from SCM, assuming ~master"
            );
            Version::master()
        }
    }
}

/// The current branch as a `~branch` version, excluding detached HEADs.
fn branch_version(root: &Path) -> Result<Version, ScmError> {
    let branch = run_git(root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if branch.is_empty() || branch == "HEAD" {
        return Err(ScmError::NoVersion);
    }
    Ok(Version::Branch(branch))
}

fn read_cache(path: &Path, head: &str) -> Option<Version> {
    let text = std::fs::read_to_string(path).ok()?;
    let cache: VersionCache = serde_json::from_str(&text).ok()?;
    if cache.commit != head {
        return None;
    }
    cache.version.parse().ok()
}

fn write_cache(path: &Path, head: &str, version: &Version) {
    let cache = VersionCache {
        version: version.to_string(),
        commit: head.to_string(),
    };
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp, serde_json::to_string(&cache).unwrap_or_default())?;
        std::fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
        debug!(error = %e, "could not write SCM version cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_commit() {
        assert_eq!(
            parse_described("v1.2.3-0-g1a2b3c4"),
            Some("1.2.3".parse().unwrap())
        );
    }

    #[test]
    fn commits_past_tag() {
        assert_eq!(
            parse_described("v1.2.3-5-g1a2b3c4"),
            Some("1.2.3+commit.5.g1a2b3c4".parse().unwrap())
        );
    }

    #[test]
    fn tag_with_existing_build_metadata() {
        assert_eq!(
            parse_described("v1.2.3+x-5-g1a2b3c4"),
            Some("1.2.3+x.commit.5.g1a2b3c4".parse().unwrap())
        );
    }

    #[test]
    fn pre_release_tag() {
        assert_eq!(
            parse_described("v2.0.0-beta.1-0-gdeadbee"),
            Some("2.0.0-beta.1".parse().unwrap())
        );
    }

    #[test]
    fn unusable_tags() {
        assert_eq!(parse_described("1.2.3-0-gabc"), None);
        assert_eq!(parse_described("vnot-a-version-0-gabc"), None);
        assert_eq!(parse_described("garbage"), None);
    }

    #[test]
    fn fallback_outside_a_repository() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(determine_version_with_fallback(tmp.path()), Version::master());
    }
}
