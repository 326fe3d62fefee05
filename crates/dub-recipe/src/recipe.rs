//! The package recipe model.
//!
//! A `Recipe` is the parsed contents of a package description file
//! (`dub.json` / `dub.sdl`), before any platform filtering: every
//! list-valued build setting is an ordered sequence of
//! `(platform filter, values)` pairs, resolved by a stable fold when
//! settings are requested for a concrete platform.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::dependency::Dependency;
use crate::platform::BuildPlatform;
use crate::settings::{BuildOptions, BuildRequirements, BuildSettings, TargetType};

/// Errors produced by recipe decoding and validation.
#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("malformed recipe syntax: {0}")]
    MalformedSyntax(String),

    #[error("invalid value for '{attribute}': {message}")]
    InvalidValue { attribute: String, message: String },

    #[error("invalid package name '{0}' (lowercase alphanumerics, '-' and '_' only)")]
    InvalidName(String),

    #[error("duplicate configuration '{0}'")]
    DuplicateConfiguration(String),

    #[error("sub-package '{0}' may not contain nested sub-packages")]
    NestedSubPackage(String),
}

/// Returns the base package of a possibly qualified `base:sub` name.
#[must_use]
pub fn base_package_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

/// Returns the sub-package part of a qualified name, if any.
#[must_use]
pub fn sub_package_part(name: &str) -> Option<&str> {
    name.split_once(':').map(|(_, sub)| sub)
}

/// Validates a bare (unqualified) package name.
///
/// # Errors
///
/// Returns `RecipeError::InvalidName` for anything other than lowercase
/// alphanumerics, `-` and `_`. The empty name passes; it is reported as a
/// lint warning at package load instead.
pub fn validate_name(name: &str) -> Result<(), RecipeError> {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RecipeError::InvalidName(name.to_string()))
    }
}

/// An ordered sequence of platform-tagged values.
///
/// The tag is a filter suffix (`""` when untagged); resolution folds the
/// matching entries in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for Tagged<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Tagged<T> {
    /// Appends a value under a platform filter suffix (`""` = untagged).
    pub fn add(&mut self, suffix: impl Into<String>, value: T) {
        self.entries.push((suffix.into(), value));
    }

    /// Returns true when no entry was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(s, v)| (s.as_str(), v))
    }

    /// Entries whose filter admits the given platform, in declaration order.
    pub fn matching<'a>(&'a self, platform: &'a BuildPlatform) -> impl Iterator<Item = &'a T> {
        self.entries
            .iter()
            .filter(move |(s, _)| platform.matches_specification(s))
            .map(|(_, v)| v)
    }
}

/// The list-valued build-settings fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListField {
    Dflags,
    Lflags,
    Libs,
    SourceFiles,
    SourcePaths,
    ImportPaths,
    StringImportPaths,
    ImportFiles,
    StringImportFiles,
    ExcludedSourceFiles,
    Versions,
    DebugVersions,
    PreGenerateCommands,
    PostGenerateCommands,
    PreBuildCommands,
    PostBuildCommands,
}

impl ListField {
    /// All list fields, in canonical emit order.
    pub const ALL: &'static [Self] = &[
        Self::Dflags,
        Self::Lflags,
        Self::Libs,
        Self::SourceFiles,
        Self::SourcePaths,
        Self::ImportPaths,
        Self::StringImportPaths,
        Self::ImportFiles,
        Self::StringImportFiles,
        Self::ExcludedSourceFiles,
        Self::Versions,
        Self::DebugVersions,
        Self::PreGenerateCommands,
        Self::PostGenerateCommands,
        Self::PreBuildCommands,
        Self::PostBuildCommands,
    ];

    /// The recipe-surface key.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Dflags => "dflags",
            Self::Lflags => "lflags",
            Self::Libs => "libs",
            Self::SourceFiles => "sourceFiles",
            Self::SourcePaths => "sourcePaths",
            Self::ImportPaths => "importPaths",
            Self::StringImportPaths => "stringImportPaths",
            Self::ImportFiles => "importFiles",
            Self::StringImportFiles => "stringImportFiles",
            Self::ExcludedSourceFiles => "excludedSourceFiles",
            Self::Versions => "versions",
            Self::DebugVersions => "debugVersions",
            Self::PreGenerateCommands => "preGenerateCommands",
            Self::PostGenerateCommands => "postGenerateCommands",
            Self::PreBuildCommands => "preBuildCommands",
            Self::PostBuildCommands => "postBuildCommands",
        }
    }

    /// Looks a field up by its recipe-surface key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }

    /// True for fields holding filesystem paths (these are rebased when
    /// variable expansion produces relative results).
    #[must_use]
    pub fn is_path_field(self) -> bool {
        matches!(
            self,
            Self::SourceFiles
                | Self::SourcePaths
                | Self::ImportPaths
                | Self::StringImportPaths
                | Self::ImportFiles
                | Self::StringImportFiles
                | Self::ExcludedSourceFiles
        )
    }
}

/// The pre-platform-filter form of a set of build settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSettingsTemplate {
    pub target_type: Option<TargetType>,
    pub target_name: Option<String>,
    pub target_path: Option<String>,
    pub working_directory: Option<String>,
    pub main_source_file: Option<String>,

    /// Dependency declarations, by package name.
    pub dependencies: BTreeMap<String, Dependency>,

    /// Forced configurations for dependencies, by package name.
    pub sub_configurations: BTreeMap<String, String>,

    pub dflags: Tagged<Vec<String>>,
    pub lflags: Tagged<Vec<String>>,
    pub libs: Tagged<Vec<String>>,
    pub source_files: Tagged<Vec<String>>,
    pub source_paths: Tagged<Vec<String>>,
    pub import_paths: Tagged<Vec<String>>,
    pub string_import_paths: Tagged<Vec<String>>,
    pub import_files: Tagged<Vec<String>>,
    pub string_import_files: Tagged<Vec<String>>,
    pub excluded_source_files: Tagged<Vec<String>>,
    pub versions: Tagged<Vec<String>>,
    pub debug_versions: Tagged<Vec<String>>,
    pub pre_generate_commands: Tagged<Vec<String>>,
    pub post_generate_commands: Tagged<Vec<String>>,
    pub pre_build_commands: Tagged<Vec<String>>,
    pub post_build_commands: Tagged<Vec<String>>,

    pub build_requirements: Tagged<BuildRequirements>,
    pub build_options: Tagged<BuildOptions>,
}

impl BuildSettingsTemplate {
    /// Shared access to a list field.
    #[must_use]
    pub fn list(&self, field: ListField) -> &Tagged<Vec<String>> {
        match field {
            ListField::Dflags => &self.dflags,
            ListField::Lflags => &self.lflags,
            ListField::Libs => &self.libs,
            ListField::SourceFiles => &self.source_files,
            ListField::SourcePaths => &self.source_paths,
            ListField::ImportPaths => &self.import_paths,
            ListField::StringImportPaths => &self.string_import_paths,
            ListField::ImportFiles => &self.import_files,
            ListField::StringImportFiles => &self.string_import_files,
            ListField::ExcludedSourceFiles => &self.excluded_source_files,
            ListField::Versions => &self.versions,
            ListField::DebugVersions => &self.debug_versions,
            ListField::PreGenerateCommands => &self.pre_generate_commands,
            ListField::PostGenerateCommands => &self.post_generate_commands,
            ListField::PreBuildCommands => &self.pre_build_commands,
            ListField::PostBuildCommands => &self.post_build_commands,
        }
    }

    /// Mutable access to a list field.
    pub fn list_mut(&mut self, field: ListField) -> &mut Tagged<Vec<String>> {
        match field {
            ListField::Dflags => &mut self.dflags,
            ListField::Lflags => &mut self.lflags,
            ListField::Libs => &mut self.libs,
            ListField::SourceFiles => &mut self.source_files,
            ListField::SourcePaths => &mut self.source_paths,
            ListField::ImportPaths => &mut self.import_paths,
            ListField::StringImportPaths => &mut self.string_import_paths,
            ListField::ImportFiles => &mut self.import_files,
            ListField::StringImportFiles => &mut self.string_import_files,
            ListField::ExcludedSourceFiles => &mut self.excluded_source_files,
            ListField::Versions => &mut self.versions,
            ListField::DebugVersions => &mut self.debug_versions,
            ListField::PreGenerateCommands => &mut self.pre_generate_commands,
            ListField::PostGenerateCommands => &mut self.post_generate_commands,
            ListField::PreBuildCommands => &mut self.pre_build_commands,
            ListField::PostBuildCommands => &mut self.post_build_commands,
        }
    }

    /// Folds this template into `dst` for one concrete platform.
    ///
    /// Scalars overwrite when declared; list entries whose filter admits
    /// the platform are appended in declaration order. An explicit
    /// `autodetect` target type never overwrites a previously folded value.
    pub fn fold_into(&self, dst: &mut BuildSettings, platform: &BuildPlatform) {
        if let Some(tt) = self.target_type {
            if tt != TargetType::Autodetect {
                dst.target_type = tt;
            }
        }
        if let Some(v) = &self.target_name {
            dst.target_name = v.clone();
        }
        if let Some(v) = &self.target_path {
            dst.target_path = v.clone();
        }
        if let Some(v) = &self.working_directory {
            dst.working_directory = v.clone();
        }
        if let Some(v) = &self.main_source_file {
            dst.main_source_file = v.clone();
        }

        for field in ListField::ALL {
            let mut staged = BuildSettings::default();
            for values in self.list(*field).matching(platform) {
                match field {
                    ListField::Dflags => staged.dflags.extend(values.iter().cloned()),
                    ListField::Lflags => staged.lflags.extend(values.iter().cloned()),
                    ListField::Libs => staged.libs.extend(values.iter().cloned()),
                    ListField::SourceFiles => {
                        staged.source_files.extend(values.iter().cloned());
                    }
                    ListField::SourcePaths => {
                        staged.source_paths.extend(values.iter().cloned());
                    }
                    ListField::ImportPaths => {
                        staged.import_paths.extend(values.iter().cloned());
                    }
                    ListField::StringImportPaths => {
                        staged.string_import_paths.extend(values.iter().cloned());
                    }
                    ListField::ImportFiles => {
                        staged.import_files.extend(values.iter().cloned());
                    }
                    ListField::StringImportFiles => {
                        staged.string_import_files.extend(values.iter().cloned());
                    }
                    ListField::ExcludedSourceFiles => {
                        staged.excluded_source_files.extend(values.iter().cloned());
                    }
                    ListField::Versions => staged.versions.extend(values.iter().cloned()),
                    ListField::DebugVersions => {
                        staged.debug_versions.extend(values.iter().cloned());
                    }
                    ListField::PreGenerateCommands => {
                        staged.pre_generate_commands.extend(values.iter().cloned());
                    }
                    ListField::PostGenerateCommands => {
                        staged.post_generate_commands.extend(values.iter().cloned());
                    }
                    ListField::PreBuildCommands => {
                        staged.pre_build_commands.extend(values.iter().cloned());
                    }
                    ListField::PostBuildCommands => {
                        staged.post_build_commands.extend(values.iter().cloned());
                    }
                }
            }
            dst.add(&staged);
        }

        for req in self.build_requirements.matching(platform) {
            dst.requirements.insert(*req);
        }
        for opt in self.build_options.matching(platform) {
            dst.options.insert(*opt);
        }
    }
}

/// A named variant of build settings within one recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationInfo {
    /// The configuration name, unique within the recipe.
    pub name: String,

    /// Platform filters restricting where this configuration applies;
    /// empty means everywhere.
    pub platforms: Vec<String>,

    /// The configuration's build-settings template, folded on top of the
    /// recipe's root template.
    pub build: BuildSettingsTemplate,
}

impl ConfigurationInfo {
    /// Tests whether any platform filter admits the given platform.
    #[must_use]
    pub fn matches_platform(&self, platform: &BuildPlatform) -> bool {
        self.platforms.is_empty()
            || self
                .platforms
                .iter()
                .any(|spec| platform.matches_specification(spec))
    }
}

/// A package declared inside another package's recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubPackage {
    /// Relative path to a directory containing the sub-package's recipe.
    Path(String),

    /// A complete recipe, inline.
    Inline(Box<Recipe>),
}

/// The parsed contents of a package description file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipe {
    /// The (unqualified) package name.
    pub name: String,

    /// The version; may be absent at load time and inferred from SCM.
    pub version: Option<String>,

    pub description: Option<String>,
    pub homepage: Option<String>,
    pub authors: Vec<String>,
    pub copyright: Option<String>,
    pub license: Option<String>,

    /// The root build-settings template.
    pub build: BuildSettingsTemplate,

    /// Named configurations, in declaration order.
    pub configurations: Vec<ConfigurationInfo>,

    /// Build-type presets declared by the recipe; these override built-ins
    /// of the same name.
    pub build_types: BTreeMap<String, BuildSettingsTemplate>,

    /// Sub-packages, inline or by path.
    pub sub_packages: Vec<SubPackage>,
}

impl Recipe {
    /// Validates structural invariants after decoding.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names, duplicate configuration names,
    /// or sub-package recipes that contain further nested sub-packages.
    pub fn validate(&self) -> Result<(), RecipeError> {
        validate_name(&self.name)?;
        let mut seen = std::collections::BTreeSet::new();
        for config in &self.configurations {
            if !seen.insert(config.name.as_str()) {
                return Err(RecipeError::DuplicateConfiguration(config.name.clone()));
            }
        }
        for sub in &self.sub_packages {
            if let SubPackage::Inline(recipe) = sub {
                if !recipe.sub_packages.is_empty() {
                    return Err(RecipeError::NestedSubPackage(recipe.name.clone()));
                }
                recipe.validate()?;
            }
        }
        Ok(())
    }

    /// Finds a configuration by name.
    #[must_use]
    pub fn configuration(&self, name: &str) -> Option<&ConfigurationInfo> {
        self.configurations.iter().find(|c| c.name == name)
    }
}

/// Fills each configuration's missing target type from the recipe's root
/// target type, falling back to `library`.
///
/// A root of `autodetect` also yields `library`; the application/library
/// split for auto-detected executables only applies to the synthesized
/// default configurations, which are created at package load.
pub fn apply_configuration_defaults(recipe: &mut Recipe) {
    let inherited = match recipe.build.target_type {
        None | Some(TargetType::Autodetect) => TargetType::Library,
        Some(t) => t,
    };
    for config in &mut recipe.configurations {
        if config.build.target_type.is_none() {
            config.build.target_type = Some(inherited);
        }
    }
    for sub in &mut recipe.sub_packages {
        if let SubPackage::Inline(recipe) = sub {
            apply_configuration_defaults(recipe);
        }
    }
}
