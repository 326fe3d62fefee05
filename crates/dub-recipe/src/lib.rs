//! Recipe model and codecs for the dub package manager core.
//!
//! This crate provides:
//! - The typed package description model (`Recipe` and friends)
//! - The two surface codecs, JSON (`dub.json`) and SDL (`dub.sdl`)
//! - Semantic-version ordering, version ranges and dependency
//!   specifications with intersection semantics
//! - Platform descriptions and platform-filter matching

pub mod dependency;
pub mod json;
pub mod platform;
pub mod recipe;
pub mod sdl;
pub mod settings;
pub mod version;

pub use dependency::{Dependency, DependencyError, DependencySpec, VersionRange};
pub use platform::BuildPlatform;
pub use recipe::{
    apply_configuration_defaults, base_package_name, sub_package_part, validate_name,
    BuildSettingsTemplate, ConfigurationInfo, ListField, Recipe, RecipeError, SubPackage, Tagged,
};
pub use settings::{BuildOptions, BuildRequirements, BuildSettings, TargetType};
pub use version::{Version, VersionError};

/// Recipe file names, in discovery precedence order.
pub const RECIPE_FILES: &[&str] = &["dub.json", "dub.sdl", "package.json"];

/// The canonical recipe file name used when writing.
pub const DEFAULT_RECIPE_FILE: &str = "dub.json";

/// Decodes a recipe, dispatching on the file-name suffix.
///
/// `.json` selects the JSON codec and `.sdl` the SDL codec; a UTF-8 BOM on
/// the input is stripped before decoding. `parent_name` is the qualified
/// name of the enclosing package when decoding a sub-package.
///
/// # Errors
///
/// Returns the codec's `RecipeError` for malformed input.
///
/// # Panics
///
/// Panics on a file name with neither a `.json` nor a `.sdl` suffix; the
/// caller is responsible for only passing discovered recipe files.
pub fn parse_recipe(
    text: &str,
    filename: &str,
    parent_name: Option<&str>,
) -> Result<Recipe, RecipeError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if filename.ends_with(".json") {
        json::decode(text, parent_name)
    } else if filename.ends_with(".sdl") {
        sdl::decode(text, parent_name)
    } else {
        panic!("unsupported recipe file name: {filename}");
    }
}

/// Serializes a recipe, dispatching on the file-name suffix.
///
/// # Panics
///
/// Panics on a file name with neither a `.json` nor a `.sdl` suffix.
#[must_use]
pub fn serialize_recipe(recipe: &Recipe, filename: &str) -> String {
    if filename.ends_with(".json") {
        json::encode(recipe)
    } else if filename.ends_with(".sdl") {
        sdl::encode(recipe)
    } else {
        panic!("unsupported recipe file name: {filename}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_by_suffix() {
        let json = parse_recipe(r#"{ "name": "demo" }"#, "dub.json", None).unwrap();
        let sdl = parse_recipe("name \"demo\"\n", "dub.sdl", None).unwrap();
        assert_eq!(json, sdl);
    }

    #[test]
    fn bom_is_stripped() {
        let text = "\u{feff}{ \"name\": \"demo\" }";
        assert_eq!(parse_recipe(text, "dub.json", None).unwrap().name, "demo");
    }

    #[test]
    fn cross_format_conversion_preserves_the_model() {
        let input = r#"{
            "name": "demo",
            "version": "1.0.0",
            "targetType": "executable",
            "dflags-linux": ["-a"],
            "dependencies": { "dep": "^1.0.0" },
            "configurations": [ { "name": "app" } ]
        }"#;
        let from_json = parse_recipe(input, "dub.json", None).unwrap();
        let sdl_text = serialize_recipe(&from_json, "dub.sdl");
        let from_sdl = parse_recipe(&sdl_text, "dub.sdl", None).unwrap();
        assert_eq!(from_json, from_sdl);

        let json_text = serialize_recipe(&from_sdl, "dub.json");
        assert_eq!(parse_recipe(&json_text, "dub.json", None).unwrap(), from_json);
    }
}
