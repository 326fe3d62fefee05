//! `$VARIABLE` expansion in build-setting values.
//!
//! Recognized names are `PACKAGE_DIR` (the referring package root),
//! `ROOT_PACKAGE_DIR`, `<NAME>_PACKAGE_DIR` for any transitively known
//! package, and any environment variable. `$$` escapes a literal `$`.
//! An unknown name is fatal. Values tagged as paths are rebased onto the
//! referring package's root when the expansion yields a relative path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use dub_recipe::settings::BuildSettings;

/// Errors produced by variable expansion.
#[derive(Error, Debug)]
pub enum VarError {
    #[error("unknown variable '${0}'")]
    UnknownVariable(String),
}

/// Expands `$NAME` and `$$` in a single string.
///
/// `resolve` returns the value for a name, or `None` for unknown names.
///
/// # Errors
///
/// Returns `UnknownVariable` when `resolve` yields `None` for a
/// referenced name.
pub fn expand_vars(
    input: &str,
    resolve: &mut dyn FnMut(&str) -> Option<String>,
) -> Result<String, VarError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some((_, c2)) if c2.is_ascii_alphanumeric() || *c2 == '_' => {
                let mut name = String::new();
                while let Some((_, c2)) = chars.peek() {
                    if c2.is_ascii_alphanumeric() || *c2 == '_' {
                        name.push(*c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match resolve(&name) {
                    Some(value) => out.push_str(&value),
                    None => return Err(VarError::UnknownVariable(name)),
                }
            }
            // a lone '$' stays literal
            _ => out.push('$'),
        }
    }
    Ok(out)
}

/// The variable name granting access to a package's root directory:
/// upper-cased, with every character outside `[A-Za-z0-9]` replaced by `_`.
#[must_use]
pub fn package_dir_var(package: &str) -> String {
    let mut name: String = package
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    name.push_str("_PACKAGE_DIR");
    name
}

/// Resolution context for expanding one package's settings.
pub struct VarContext<'a> {
    /// Root directory of the referring package.
    pub package_dir: &'a Path,

    /// Root directory of the root package.
    pub root_package_dir: &'a Path,

    /// Roots of all transitively known packages, by package name.
    pub package_dirs: &'a BTreeMap<String, PathBuf>,
}

impl VarContext<'_> {
    fn resolve(&self, name: &str) -> Option<String> {
        match name {
            "PACKAGE_DIR" => Some(self.package_dir.to_string_lossy().into_owned()),
            "ROOT_PACKAGE_DIR" => Some(self.root_package_dir.to_string_lossy().into_owned()),
            _ => self
                .package_dirs
                .iter()
                .find(|(pkg, _)| package_dir_var(pkg) == name)
                .map(|(_, dir)| dir.to_string_lossy().into_owned())
                .or_else(|| std::env::var(name).ok()),
        }
    }

    fn expand(&self, value: &str) -> Result<String, VarError> {
        expand_vars(value, &mut |name| self.resolve(name))
    }

    fn expand_path(&self, value: &str) -> Result<String, VarError> {
        let expanded = self.expand(value)?;
        if expanded.is_empty() || Path::new(&expanded).is_absolute() {
            return Ok(expanded);
        }
        Ok(self
            .package_dir
            .join(&expanded)
            .to_string_lossy()
            .into_owned())
    }

    fn expand_all(&self, values: &mut Vec<String>) -> Result<(), VarError> {
        for value in values {
            *value = self.expand(value)?;
        }
        Ok(())
    }

    fn expand_all_paths(&self, values: &mut Vec<String>) -> Result<(), VarError> {
        for value in values {
            *value = self.expand_path(value)?;
        }
        Ok(())
    }
}

/// Expands all string values of a settings aggregate in place.
///
/// Path-tagged fields (sources, imports, string imports, exclusions, the
/// main source file and the working directory) additionally rebase
/// relative results onto the referring package's root.
///
/// # Errors
///
/// Returns `UnknownVariable` for references to unknown names.
pub fn expand_settings(settings: &mut BuildSettings, ctx: &VarContext<'_>) -> Result<(), VarError> {
    settings.target_path = ctx.expand(&settings.target_path)?;
    settings.target_name = ctx.expand(&settings.target_name)?;
    settings.working_directory = ctx.expand_path(&settings.working_directory)?;
    settings.main_source_file = ctx.expand_path(&settings.main_source_file)?;

    ctx.expand_all_paths(&mut settings.source_files)?;
    ctx.expand_all_paths(&mut settings.source_paths)?;
    ctx.expand_all_paths(&mut settings.import_paths)?;
    ctx.expand_all_paths(&mut settings.string_import_paths)?;
    ctx.expand_all_paths(&mut settings.import_files)?;
    ctx.expand_all_paths(&mut settings.string_import_files)?;
    ctx.expand_all_paths(&mut settings.excluded_source_files)?;

    ctx.expand_all(&mut settings.dflags)?;
    ctx.expand_all(&mut settings.lflags)?;
    ctx.expand_all(&mut settings.libs)?;
    ctx.expand_all(&mut settings.versions)?;
    ctx.expand_all(&mut settings.debug_versions)?;
    ctx.expand_all(&mut settings.pre_generate_commands)?;
    ctx.expand_all(&mut settings.post_generate_commands)?;
    ctx.expand_all(&mut settings.pre_build_commands)?;
    ctx.expand_all(&mut settings.post_build_commands)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(name: &str) -> Option<String> {
        match name {
            "A" => Some("1".to_string()),
            "LONG_NAME2" => Some("2".to_string()),
            _ => None,
        }
    }

    #[test]
    fn identity_without_references() {
        let mut resolve = fixed;
        assert_eq!(expand_vars("plain text", &mut resolve).unwrap(), "plain text");
        assert_eq!(expand_vars("", &mut resolve).unwrap(), "");
    }

    #[test]
    fn simple_expansion() {
        let mut resolve = fixed;
        assert_eq!(expand_vars("x$A/y", &mut resolve).unwrap(), "x1/y");
        assert_eq!(expand_vars("$LONG_NAME2", &mut resolve).unwrap(), "2");
    }

    #[test]
    fn dollar_escapes() {
        let mut resolve = fixed;
        assert_eq!(expand_vars("100$$", &mut resolve).unwrap(), "100$");
        assert_eq!(expand_vars("$ alone", &mut resolve).unwrap(), "$ alone");
    }

    #[test]
    fn unknown_variable_is_fatal() {
        let mut resolve = fixed;
        assert!(matches!(
            expand_vars("$NOPE", &mut resolve),
            Err(VarError::UnknownVariable(name)) if name == "NOPE"
        ));
    }

    #[test]
    fn expansion_is_idempotent_on_expanded_values() {
        let mut resolve = fixed;
        let once = expand_vars("a$A", &mut resolve).unwrap();
        assert_eq!(expand_vars(&once, &mut resolve).unwrap(), once);
    }

    #[test]
    fn package_dir_var_names() {
        assert_eq!(package_dir_var("my-pkg"), "MY_PKG_PACKAGE_DIR");
        assert_eq!(package_dir_var("base:sub"), "BASE_SUB_PACKAGE_DIR");
    }

    #[test]
    fn path_values_are_rebased() {
        let dirs = BTreeMap::new();
        let ctx = VarContext {
            package_dir: Path::new("/pkg"),
            root_package_dir: Path::new("/root"),
            package_dirs: &dirs,
        };
        let mut settings = BuildSettings::default();
        settings.source_paths.push("source".to_string());
        settings.dflags.push("-I$PACKAGE_DIR".to_string());
        expand_settings(&mut settings, &ctx).unwrap();
        assert_eq!(settings.source_paths, vec!["/pkg/source"]);
        assert_eq!(settings.dflags, vec!["-I/pkg"]);
    }
}
