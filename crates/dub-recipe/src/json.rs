//! The JSON recipe codec (`dub.json`).
//!
//! The surface is an object whose keys are either recipe attributes or a
//! build-settings attribute with a platform-filter suffix
//! (`"dflags-linux-x86_64"`). Unknown keys are skipped with a diagnostic.

use serde_json::{Map, Value};
use tracing::warn;

use crate::dependency::{Dependency, DependencySpec};
use crate::recipe::{
    apply_configuration_defaults, BuildSettingsTemplate, ConfigurationInfo, ListField, Recipe,
    RecipeError, SubPackage,
};
use crate::settings::{BuildOptions, BuildRequirements, TargetType};

/// Decodes a JSON recipe.
///
/// `parent_name` is the qualified name of the enclosing package when
/// decoding an inline sub-package; it is only used for diagnostics.
///
/// # Errors
///
/// Returns `MalformedSyntax` for invalid JSON and `InvalidValue` for
/// values of the wrong shape. Unknown attributes merely log a warning.
pub fn decode(text: &str, parent_name: Option<&str>) -> Result<Recipe, RecipeError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RecipeError::MalformedSyntax(e.to_string()))?;
    let mut recipe = recipe_from_json(&value, parent_name)?;
    apply_configuration_defaults(&mut recipe);
    recipe.validate()?;
    Ok(recipe)
}

/// Encodes a recipe as pretty-printed JSON.
#[must_use]
pub fn encode(recipe: &Recipe) -> String {
    let value = recipe_to_json(recipe);
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

fn expect_str(value: &Value, attribute: &str) -> Result<String, RecipeError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RecipeError::InvalidValue {
            attribute: attribute.to_string(),
            message: "expected a string".to_string(),
        })
}

fn expect_str_array(value: &Value, attribute: &str) -> Result<Vec<String>, RecipeError> {
    let items = value.as_array().ok_or_else(|| RecipeError::InvalidValue {
        attribute: attribute.to_string(),
        message: "expected an array of strings".to_string(),
    })?;
    items.iter().map(|v| expect_str(v, attribute)).collect()
}

fn expect_object<'a>(
    value: &'a Value,
    attribute: &str,
) -> Result<&'a Map<String, Value>, RecipeError> {
    value.as_object().ok_or_else(|| RecipeError::InvalidValue {
        attribute: attribute.to_string(),
        message: "expected an object".to_string(),
    })
}

fn recipe_from_json(value: &Value, parent_name: Option<&str>) -> Result<Recipe, RecipeError> {
    let obj = expect_object(value, "recipe")?;
    let mut recipe = Recipe::default();

    for (key, v) in obj {
        match key.as_str() {
            "name" => recipe.name = expect_str(v, key)?,
            "version" => recipe.version = Some(expect_str(v, key)?),
            "description" => recipe.description = Some(expect_str(v, key)?),
            "homepage" => recipe.homepage = Some(expect_str(v, key)?),
            "copyright" => recipe.copyright = Some(expect_str(v, key)?),
            "license" => recipe.license = Some(expect_str(v, key)?),
            "authors" => recipe.authors = expect_str_array(v, key)?,
            "configurations" => {
                let items = v.as_array().ok_or_else(|| RecipeError::InvalidValue {
                    attribute: key.clone(),
                    message: "expected an array".to_string(),
                })?;
                for item in items {
                    recipe.configurations.push(configuration_from_json(item)?);
                }
            }
            "buildTypes" => {
                for (name, tv) in expect_object(v, key)? {
                    let mut template = BuildSettingsTemplate::default();
                    template_from_json(expect_object(tv, name)?, &mut template, name)?;
                    recipe.build_types.insert(name.clone(), template);
                }
            }
            "subPackages" => {
                let items = v.as_array().ok_or_else(|| RecipeError::InvalidValue {
                    attribute: key.clone(),
                    message: "expected an array".to_string(),
                })?;
                for item in items {
                    recipe.sub_packages.push(match item {
                        Value::String(path) => SubPackage::Path(path.clone()),
                        _ => {
                            let parent = if recipe.name.is_empty() {
                                parent_name.unwrap_or("")
                            } else {
                                &recipe.name
                            };
                            SubPackage::Inline(Box::new(recipe_from_json(item, Some(parent))?))
                        }
                    });
                }
            }
            _ => {
                if !build_setting_from_json(&mut recipe.build, key, v)? {
                    warn!(
                        attribute = key.as_str(),
                        package = parent_name.unwrap_or(&recipe.name),
                        "ignoring unknown recipe attribute"
                    );
                }
            }
        }
    }

    Ok(recipe)
}

fn configuration_from_json(value: &Value) -> Result<ConfigurationInfo, RecipeError> {
    let obj = expect_object(value, "configurations")?;
    let mut config = ConfigurationInfo::default();
    for (key, v) in obj {
        match key.as_str() {
            "name" => config.name = expect_str(v, key)?,
            "platforms" => config.platforms = expect_str_array(v, key)?,
            _ => {
                if !build_setting_from_json(&mut config.build, key, v)? {
                    warn!(attribute = key.as_str(), "ignoring unknown configuration attribute");
                }
            }
        }
    }
    if config.name.is_empty() {
        return Err(RecipeError::InvalidValue {
            attribute: "configurations".to_string(),
            message: "configuration without a name".to_string(),
        });
    }
    Ok(config)
}

fn template_from_json(
    obj: &Map<String, Value>,
    template: &mut BuildSettingsTemplate,
    context: &str,
) -> Result<(), RecipeError> {
    for (key, v) in obj {
        if !build_setting_from_json(template, key, v)? {
            warn!(
                attribute = key.as_str(),
                context, "ignoring unknown build-settings attribute"
            );
        }
    }
    Ok(())
}

/// Applies one `<attribute>[-<platform-filter>]` key to a template.
///
/// Returns false when the base attribute is not a build setting.
fn build_setting_from_json(
    template: &mut BuildSettingsTemplate,
    key: &str,
    value: &Value,
) -> Result<bool, RecipeError> {
    let (base, suffix) = match key.find('-') {
        Some(idx) => (&key[..idx], &key[idx + 1..]),
        None => (key, ""),
    };

    match base {
        "targetType" => {
            template.target_type =
                Some(parse_target_type(&expect_str(value, key)?, key)?);
        }
        "targetName" => template.target_name = Some(expect_str(value, key)?),
        "targetPath" => template.target_path = Some(expect_str(value, key)?),
        "workingDirectory" => template.working_directory = Some(expect_str(value, key)?),
        "mainSourceFile" => template.main_source_file = Some(expect_str(value, key)?),
        "dependencies" => {
            for (name, dv) in expect_object(value, key)? {
                let dep = dependency_from_json(dv, name)?;
                template.dependencies.insert(name.clone(), dep);
            }
        }
        "subConfigurations" => {
            for (name, cv) in expect_object(value, key)? {
                template
                    .sub_configurations
                    .insert(name.clone(), expect_str(cv, key)?);
            }
        }
        "buildRequirements" => {
            let mut flags = BuildRequirements::none();
            for name in expect_str_array(value, key)? {
                flags.insert(name.parse().map_err(|e: crate::settings::UnknownNameError| {
                    RecipeError::InvalidValue {
                        attribute: key.to_string(),
                        message: e.to_string(),
                    }
                })?);
            }
            template.build_requirements.add(suffix, flags);
        }
        "buildOptions" => {
            let mut flags = BuildOptions::none();
            for name in expect_str_array(value, key)? {
                flags.insert(name.parse().map_err(|e: crate::settings::UnknownNameError| {
                    RecipeError::InvalidValue {
                        attribute: key.to_string(),
                        message: e.to_string(),
                    }
                })?);
            }
            template.build_options.add(suffix, flags);
        }
        _ => match ListField::from_key(base) {
            Some(field) => {
                let values = expect_str_array(value, key)?;
                template.list_mut(field).add(suffix, values);
            }
            None => return Ok(false),
        },
    }
    Ok(true)
}

fn parse_target_type(text: &str, attribute: &str) -> Result<TargetType, RecipeError> {
    text.parse().map_err(|e: crate::settings::UnknownNameError| {
        RecipeError::InvalidValue {
            attribute: attribute.to_string(),
            message: e.to_string(),
        }
    })
}

/// Decodes a dependency from its JSON shape: either a version string or an
/// object with `version`/`path`/`optional`/`default` members.
///
/// # Errors
///
/// Returns `InvalidValue` for malformed version specifications or unknown
/// member shapes.
pub fn dependency_from_json(value: &Value, name: &str) -> Result<Dependency, RecipeError> {
    match value {
        Value::String(spec) => spec.parse().map_err(|e: crate::dependency::DependencyError| {
            RecipeError::InvalidValue {
                attribute: format!("dependencies.{name}"),
                message: e.to_string(),
            }
        }),
        Value::Object(obj) => {
            let mut dep = if let Some(path) = obj.get("path") {
                // a path always wins over a version given alongside it
                Dependency::path(expect_str(path, name)?)
            } else if let Some(version) = obj.get("version") {
                expect_str(version, name)?.parse().map_err(
                    |e: crate::dependency::DependencyError| RecipeError::InvalidValue {
                        attribute: format!("dependencies.{name}"),
                        message: e.to_string(),
                    },
                )?
            } else {
                Dependency::any()
            };
            if let Some(optional) = obj.get("optional") {
                dep.optional = optional.as_bool().ok_or_else(|| RecipeError::InvalidValue {
                    attribute: format!("dependencies.{name}.optional"),
                    message: "expected a boolean".to_string(),
                })?;
            }
            if let Some(default) = obj.get("default") {
                dep.is_default = default.as_bool().ok_or_else(|| RecipeError::InvalidValue {
                    attribute: format!("dependencies.{name}.default"),
                    message: "expected a boolean".to_string(),
                })?;
            }
            Ok(dep)
        }
        _ => Err(RecipeError::InvalidValue {
            attribute: format!("dependencies.{name}"),
            message: "expected a version string or an object".to_string(),
        }),
    }
}

/// Encodes a dependency into its JSON shape.
#[must_use]
pub fn dependency_to_json(dep: &Dependency) -> Value {
    match &dep.spec {
        DependencySpec::Path(path) => {
            let mut obj = Map::new();
            obj.insert(
                "path".to_string(),
                Value::String(path.to_string_lossy().into_owned()),
            );
            add_dependency_flags(&mut obj, dep);
            Value::Object(obj)
        }
        _ if dep.optional || dep.is_default => {
            let mut obj = Map::new();
            obj.insert("version".to_string(), Value::String(dep.to_string()));
            add_dependency_flags(&mut obj, dep);
            Value::Object(obj)
        }
        _ => Value::String(dep.to_string()),
    }
}

fn add_dependency_flags(obj: &mut Map<String, Value>, dep: &Dependency) {
    if dep.optional {
        obj.insert("optional".to_string(), Value::Bool(true));
    }
    if dep.is_default {
        obj.insert("default".to_string(), Value::Bool(true));
    }
}

fn recipe_to_json(recipe: &Recipe) -> Value {
    let mut obj = Map::new();
    obj.insert("name".to_string(), Value::String(recipe.name.clone()));
    if let Some(v) = &recipe.version {
        obj.insert("version".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &recipe.description {
        obj.insert("description".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &recipe.homepage {
        obj.insert("homepage".to_string(), Value::String(v.clone()));
    }
    if !recipe.authors.is_empty() {
        obj.insert(
            "authors".to_string(),
            Value::Array(recipe.authors.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(v) = &recipe.copyright {
        obj.insert("copyright".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &recipe.license {
        obj.insert("license".to_string(), Value::String(v.clone()));
    }

    template_to_json(&recipe.build, &mut obj);

    if !recipe.configurations.is_empty() {
        let configs = recipe
            .configurations
            .iter()
            .map(|c| {
                let mut cobj = Map::new();
                cobj.insert("name".to_string(), Value::String(c.name.clone()));
                if !c.platforms.is_empty() {
                    cobj.insert(
                        "platforms".to_string(),
                        Value::Array(c.platforms.iter().cloned().map(Value::String).collect()),
                    );
                }
                template_to_json(&c.build, &mut cobj);
                Value::Object(cobj)
            })
            .collect();
        obj.insert("configurations".to_string(), Value::Array(configs));
    }

    if !recipe.build_types.is_empty() {
        let mut types = Map::new();
        for (name, template) in &recipe.build_types {
            let mut tobj = Map::new();
            template_to_json(template, &mut tobj);
            types.insert(name.clone(), Value::Object(tobj));
        }
        obj.insert("buildTypes".to_string(), Value::Object(types));
    }

    if !recipe.sub_packages.is_empty() {
        let subs = recipe
            .sub_packages
            .iter()
            .map(|s| match s {
                SubPackage::Path(path) => Value::String(path.clone()),
                SubPackage::Inline(recipe) => recipe_to_json(recipe),
            })
            .collect();
        obj.insert("subPackages".to_string(), Value::Array(subs));
    }

    Value::Object(obj)
}

fn template_to_json(template: &BuildSettingsTemplate, obj: &mut Map<String, Value>) {
    if let Some(tt) = template.target_type {
        obj.insert("targetType".to_string(), Value::String(tt.to_string()));
    }
    if let Some(v) = &template.target_name {
        obj.insert("targetName".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &template.target_path {
        obj.insert("targetPath".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &template.working_directory {
        obj.insert("workingDirectory".to_string(), Value::String(v.clone()));
    }
    if let Some(v) = &template.main_source_file {
        obj.insert("mainSourceFile".to_string(), Value::String(v.clone()));
    }

    if !template.dependencies.is_empty() {
        let mut deps = Map::new();
        for (name, dep) in &template.dependencies {
            deps.insert(name.clone(), dependency_to_json(dep));
        }
        obj.insert("dependencies".to_string(), Value::Object(deps));
    }
    if !template.sub_configurations.is_empty() {
        let mut subs = Map::new();
        for (name, config) in &template.sub_configurations {
            subs.insert(name.clone(), Value::String(config.clone()));
        }
        obj.insert("subConfigurations".to_string(), Value::Object(subs));
    }

    for field in ListField::ALL {
        for (suffix, values) in merge_by_suffix(template.list(*field).entries()) {
            obj.insert(
                tagged_key(field.key(), &suffix),
                Value::Array(values.into_iter().map(Value::String).collect()),
            );
        }
    }

    for (suffix, flags) in template.build_requirements.entries() {
        let key = tagged_key("buildRequirements", suffix);
        merge_flag_names(obj, &key, flags.names());
    }
    for (suffix, flags) in template.build_options.entries() {
        let key = tagged_key("buildOptions", suffix);
        merge_flag_names(obj, &key, flags.names());
    }
}

fn tagged_key(base: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        base.to_string()
    } else {
        format!("{base}-{suffix}")
    }
}

/// Collapses repeated entries with the same suffix into one JSON key,
/// preserving first-seen order and value order.
fn merge_by_suffix<'a>(
    entries: impl Iterator<Item = (&'a str, &'a Vec<String>)>,
) -> Vec<(String, Vec<String>)> {
    let mut merged: Vec<(String, Vec<String>)> = Vec::new();
    for (suffix, values) in entries {
        match merged.iter_mut().find(|(s, _)| s == suffix) {
            Some((_, existing)) => existing.extend(values.iter().cloned()),
            None => merged.push((suffix.to_string(), values.clone())),
        }
    }
    merged
}

fn merge_flag_names(obj: &mut Map<String, Value>, key: &str, names: Vec<&'static str>) {
    let entry = obj
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(items) = entry {
        for name in names {
            let v = Value::String(name.to_string());
            if !items.contains(&v) {
                items.push(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_minimal() {
        let recipe = decode(r#"{ "name": "demo" }"#, None).unwrap();
        assert_eq!(recipe.name, "demo");
        assert!(recipe.version.is_none());
    }

    #[test]
    fn decode_platform_tagged_settings() {
        let recipe = decode(
            r#"{
                "name": "demo",
                "dflags": ["-a"],
                "dflags-linux-x86_64": ["-b"],
                "lflags-windows": ["-c"]
            }"#,
            None,
        )
        .unwrap();
        let entries: Vec<_> = recipe.build.dflags.entries().collect();
        assert_eq!(entries[0], ("", &vec!["-a".to_string()]));
        assert_eq!(entries[1], ("linux-x86_64", &vec!["-b".to_string()]));
    }

    #[test]
    fn decode_dependencies() {
        let recipe = decode(
            r#"{
                "name": "demo",
                "dependencies": {
                    "ranged": "^1.2.0",
                    "pinned": "==1.0.0",
                    "local": { "path": "../local", "optional": true },
                    "opt": { "version": "~master", "optional": true, "default": true }
                }
            }"#,
            None,
        )
        .unwrap();
        let deps = &recipe.build.dependencies;
        assert!(deps["ranged"].matches(&"1.5.0".parse().unwrap()));
        assert_eq!(deps["pinned"].exact_version(), Some("1.0.0".parse().unwrap()));
        assert!(deps["local"].path_spec().is_some());
        assert!(deps["local"].optional);
        assert!(deps["opt"].optional && deps["opt"].is_default);
    }

    #[test]
    fn decode_configurations_and_defaulting() {
        let recipe = decode(
            r#"{
                "name": "demo",
                "targetType": "executable",
                "configurations": [
                    { "name": "app" },
                    { "name": "lib", "targetType": "library" }
                ]
            }"#,
            None,
        )
        .unwrap();
        assert_eq!(
            recipe.configurations[0].build.target_type,
            Some(TargetType::Executable)
        );
        assert_eq!(
            recipe.configurations[1].build.target_type,
            Some(TargetType::Library)
        );
    }

    #[test]
    fn decode_sub_packages() {
        let recipe = decode(
            r#"{
                "name": "base",
                "subPackages": [
                    "component",
                    { "name": "inline", "targetType": "library" }
                ]
            }"#,
            None,
        )
        .unwrap();
        assert_eq!(recipe.sub_packages.len(), 2);
        assert!(matches!(&recipe.sub_packages[0], SubPackage::Path(p) if p == "component"));
        assert!(
            matches!(&recipe.sub_packages[1], SubPackage::Inline(r) if r.name == "inline")
        );
    }

    #[test]
    fn unknown_attribute_is_ignored() {
        let recipe = decode(r#"{ "name": "demo", "frobnicate": 1 }"#, None).unwrap();
        assert_eq!(recipe.name, "demo");
    }

    #[test]
    fn invalid_shape_is_rejected() {
        assert!(matches!(
            decode(r#"{ "name": ["demo"] }"#, None),
            Err(RecipeError::InvalidValue { .. })
        ));
        assert!(matches!(
            decode("{", None),
            Err(RecipeError::MalformedSyntax(_))
        ));
    }

    #[test]
    fn round_trip() {
        let input = r#"{
            "name": "demo",
            "version": "1.2.3",
            "license": "MIT",
            "authors": ["Jane Doe"],
            "targetType": "library",
            "dflags-linux": ["-a", "-b"],
            "buildOptions": ["debugMode", "debugInfo"],
            "dependencies": {
                "dep": ">=1.0.0 <2.0.0",
                "local": { "path": "sub" }
            },
            "configurations": [
                { "name": "default", "libs-posix": ["z"] }
            ],
            "buildTypes": {
                "custom": { "dflags": ["-custom"] }
            },
            "subPackages": ["component"]
        }"#;
        let first = decode(input, None).unwrap();
        let encoded = encode(&first);
        let second = decode(&encoded, None).unwrap();
        assert_eq!(first, second);
    }
}
