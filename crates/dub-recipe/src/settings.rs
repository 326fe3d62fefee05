//! Resolved build settings and the enumerations they are made of.
//!
//! `BuildSettings` is the post-platform-filter form: templates from the
//! recipe are folded into it for one concrete platform and configuration.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for unrecognized enumeration names in recipes.
#[derive(Error, Debug)]
#[error("unknown {kind} '{name}'")]
pub struct UnknownNameError {
    pub kind: &'static str,
    pub name: String,
}

/// The kind of artifact a package or configuration produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetType {
    /// Determined from the package layout (main source file present or not).
    #[default]
    Autodetect,
    /// No artifact; the package only contributes settings.
    None,
    /// An executable program.
    Executable,
    /// A library in the compiler's default flavor.
    Library,
    /// A library distributed as source, compiled into dependents.
    SourceLibrary,
    /// A static library archive.
    StaticLibrary,
    /// A dynamic/shared library.
    DynamicLibrary,
}

impl TargetType {
    /// The recipe-surface spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Autodetect => "autodetect",
            Self::None => "none",
            Self::Executable => "executable",
            Self::Library => "library",
            Self::SourceLibrary => "sourceLibrary",
            Self::StaticLibrary => "staticLibrary",
            Self::DynamicLibrary => "dynamicLibrary",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autodetect" => Ok(Self::Autodetect),
            "none" => Ok(Self::None),
            "executable" => Ok(Self::Executable),
            "library" => Ok(Self::Library),
            "sourceLibrary" => Ok(Self::SourceLibrary),
            "staticLibrary" => Ok(Self::StaticLibrary),
            "dynamicLibrary" => Ok(Self::DynamicLibrary),
            _ => Err(UnknownNameError {
                kind: "target type",
                name: s.to_string(),
            }),
        }
    }
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($flag:ident = $bit:expr => $text:literal,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u32);

        impl $name {
            $(pub const $flag: Self = Self(1 << $bit);)*

            /// Name/flag pairs in declaration order.
            pub const ALL: &'static [(&'static str, Self)] = &[
                $(($text, Self::$flag),)*
            ];

            /// The empty set.
            #[must_use]
            pub fn none() -> Self {
                Self(0)
            }

            /// Returns true if no flag is set.
            #[must_use]
            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Tests whether all flags of `other` are set.
            #[must_use]
            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Sets all flags of `other`.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clears all flags of `other`.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Looks up a flag by its recipe-surface name.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
            }

            /// The recipe-surface names of all set flags.
            #[must_use]
            pub fn names(self) -> Vec<&'static str> {
                Self::ALL
                    .iter()
                    .filter(|(_, f)| self.contains(*f))
                    .map(|(n, _)| *n)
                    .collect()
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl FromStr for $name {
            type Err = UnknownNameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_name(s).ok_or_else(|| UnknownNameError {
                    kind: $kind,
                    name: s.to_string(),
                })
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list().entries(self.names()).finish()
            }
        }
    };
}

flag_set!(
    /// Hard requirements a package imposes on how it is built.
    BuildRequirements, "build requirement", {
        ALLOW_WARNINGS = 0 => "allowWarnings",
        SILENCE_WARNINGS = 1 => "silenceWarnings",
        DISALLOW_DEPRECATIONS = 2 => "disallowDeprecations",
        SILENCE_DEPRECATIONS = 3 => "silenceDeprecations",
        DISALLOW_INLINING = 4 => "disallowInlining",
        DISALLOW_OPTIMIZATION = 5 => "disallowOptimization",
        REQUIRE_BOUNDS_CHECK = 6 => "requireBoundsCheck",
        REQUIRE_CONTRACTS = 7 => "requireContracts",
        RELAX_PROPERTIES = 8 => "relaxProperties",
        NO_DEFAULT_FLAGS = 9 => "noDefaultFlags",
    }
);

flag_set!(
    /// Abstract compiler options, translated to flags by the compiler driver.
    BuildOptions, "build option", {
        DEBUG_MODE = 0 => "debugMode",
        RELEASE_MODE = 1 => "releaseMode",
        COVERAGE = 2 => "coverage",
        DEBUG_INFO = 3 => "debugInfo",
        DEBUG_INFO_C = 4 => "debugInfoC",
        ALWAYS_STACK_FRAME = 5 => "alwaysStackFrame",
        STACK_STOMPING = 6 => "stackStomping",
        INLINE = 7 => "inline",
        NO_BOUNDS_CHECK = 8 => "noBoundsCheck",
        OPTIMIZE = 9 => "optimize",
        PROFILE = 10 => "profile",
        UNITTESTS = 11 => "unittests",
        VERBOSE = 12 => "verbose",
        IGNORE_UNKNOWN_PRAGMAS = 13 => "ignoreUnknownPragmas",
        SYNTAX_ONLY = 14 => "syntaxOnly",
        WARNINGS = 15 => "warnings",
        WARNINGS_AS_ERRORS = 16 => "warningsAsErrors",
        IGNORE_DEPRECATIONS = 17 => "ignoreDeprecations",
        DEPRECATION_WARNINGS = 18 => "deprecationWarnings",
        DEPRECATION_ERRORS = 19 => "deprecationErrors",
        PROPERTY = 20 => "property",
        PROFILE_GC = 21 => "profileGC",
    }
);

/// Build settings resolved for one platform and configuration.
///
/// Empty strings mean "unset" for the scalar fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSettings {
    pub target_type: TargetType,
    pub target_path: String,
    pub target_name: String,
    pub working_directory: String,
    pub main_source_file: String,

    pub dflags: Vec<String>,
    pub lflags: Vec<String>,
    pub libs: Vec<String>,
    pub source_files: Vec<String>,
    pub source_paths: Vec<String>,
    pub import_paths: Vec<String>,
    pub string_import_paths: Vec<String>,
    pub import_files: Vec<String>,
    pub string_import_files: Vec<String>,
    pub excluded_source_files: Vec<String>,
    pub versions: Vec<String>,
    pub debug_versions: Vec<String>,
    pub pre_generate_commands: Vec<String>,
    pub post_generate_commands: Vec<String>,
    pub pre_build_commands: Vec<String>,
    pub post_build_commands: Vec<String>,

    pub requirements: BuildRequirements,
    pub options: BuildOptions,
}

fn append_unique(dst: &mut Vec<String>, values: impl IntoIterator<Item = String>) {
    for v in values {
        if !dst.contains(&v) {
            dst.push(v);
        }
    }
}

impl BuildSettings {
    /// Appends another settings aggregate onto this one.
    ///
    /// List-valued fields accumulate (paths, files, versions and libraries
    /// deduplicate; flags and commands append as-is); flag sets union.
    /// Scalar fields are left untouched, the caller decides whose scalars
    /// win.
    pub fn add(&mut self, other: &BuildSettings) {
        self.add_dflags(other.dflags.iter().cloned());
        self.add_lflags(other.lflags.iter().cloned());
        append_unique(&mut self.libs, other.libs.iter().cloned());
        append_unique(&mut self.source_files, other.source_files.iter().cloned());
        append_unique(&mut self.source_paths, other.source_paths.iter().cloned());
        append_unique(&mut self.import_paths, other.import_paths.iter().cloned());
        append_unique(
            &mut self.string_import_paths,
            other.string_import_paths.iter().cloned(),
        );
        append_unique(&mut self.import_files, other.import_files.iter().cloned());
        append_unique(
            &mut self.string_import_files,
            other.string_import_files.iter().cloned(),
        );
        append_unique(
            &mut self.excluded_source_files,
            other.excluded_source_files.iter().cloned(),
        );
        self.add_versions(other.versions.iter().cloned());
        append_unique(&mut self.debug_versions, other.debug_versions.iter().cloned());
        self.pre_generate_commands
            .extend(other.pre_generate_commands.iter().cloned());
        self.post_generate_commands
            .extend(other.post_generate_commands.iter().cloned());
        self.pre_build_commands
            .extend(other.pre_build_commands.iter().cloned());
        self.post_build_commands
            .extend(other.post_build_commands.iter().cloned());
        self.requirements.insert(other.requirements);
        self.options.insert(other.options);
    }

    /// Appends compiler flags, preserving order and duplicates.
    pub fn add_dflags(&mut self, flags: impl IntoIterator<Item = String>) {
        self.dflags.extend(flags);
    }

    /// Appends linker flags, preserving order and duplicates.
    pub fn add_lflags(&mut self, flags: impl IntoIterator<Item = String>) {
        self.lflags.extend(flags);
    }

    /// Appends version identifiers, without duplicates.
    pub fn add_versions(&mut self, versions: impl IntoIterator<Item = String>) {
        append_unique(&mut self.versions, versions);
    }

    /// Sets build options.
    pub fn add_options(&mut self, options: BuildOptions) {
        self.options.insert(options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_type_names_round_trip() {
        for tt in [
            TargetType::Autodetect,
            TargetType::None,
            TargetType::Executable,
            TargetType::Library,
            TargetType::SourceLibrary,
            TargetType::StaticLibrary,
            TargetType::DynamicLibrary,
        ] {
            assert_eq!(tt.as_str().parse::<TargetType>().unwrap(), tt);
        }
        assert!("sharedLibrary".parse::<TargetType>().is_err());
    }

    #[test]
    fn flag_bit_manipulation() {
        let mut opts = BuildOptions::none();
        opts.insert(BuildOptions::DEBUG_MODE | BuildOptions::DEBUG_INFO);
        assert!(opts.contains(BuildOptions::DEBUG_MODE));
        opts.remove(BuildOptions::DEBUG_MODE);
        assert!(!opts.contains(BuildOptions::DEBUG_MODE));
        assert!(opts.contains(BuildOptions::DEBUG_INFO));
    }

    #[test]
    fn flag_names_round_trip() {
        let opts = BuildOptions::RELEASE_MODE | BuildOptions::OPTIMIZE | BuildOptions::INLINE;
        assert_eq!(opts.names(), vec!["releaseMode", "inline", "optimize"]);
        for name in opts.names() {
            assert!(opts.contains(BuildOptions::from_name(name).unwrap()));
        }
        assert!(BuildOptions::from_name("fastMath").is_none());
        assert!(BuildRequirements::from_name("allowWarnings").is_some());
    }

    #[test]
    fn add_deduplicates_paths_but_not_flags() {
        let mut a = BuildSettings::default();
        a.import_paths.push("source".into());
        a.dflags.push("-g".into());

        let mut b = BuildSettings::default();
        b.import_paths.push("source".into());
        b.dflags.push("-g".into());
        b.options = BuildOptions::COVERAGE;

        a.add(&b);
        assert_eq!(a.import_paths, vec!["source"]);
        assert_eq!(a.dflags, vec!["-g", "-g"]);
        assert!(a.options.contains(BuildOptions::COVERAGE));
    }
}
