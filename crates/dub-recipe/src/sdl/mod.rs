//! The SDL recipe codec (`dub.sdl`).
//!
//! The surface is a block-structured textual form: top-level tags set
//! scalar fields, repeated tags accumulate into arrays, attribute-style
//! platform filters restrict individual tags, and `configuration`,
//! `buildType` and `subPackage` blocks open nested scopes.

mod lexer;

use tracing::{debug, warn};

use crate::dependency::Dependency;
use crate::recipe::{
    apply_configuration_defaults, BuildSettingsTemplate, ConfigurationInfo, ListField, Recipe,
    RecipeError, SubPackage,
};
use crate::settings::{BuildOptions, BuildRequirements};

use lexer::{tokenize, unescape_string, Token, TokenKind};

/// A single SDL value.
#[derive(Debug, Clone, PartialEq)]
enum SdlValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl SdlValue {
    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// A parsed SDL tag with its values, attributes and children.
#[derive(Debug, Clone, Default)]
struct SdlTag {
    name: String,
    line: usize,
    values: Vec<SdlValue>,
    attributes: Vec<(String, SdlValue)>,
    children: Vec<SdlTag>,
}

impl SdlTag {
    fn attribute(&self, name: &str) -> Option<&SdlValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// All values as strings; errors if any value is not a string.
    fn string_values(&self) -> Result<Vec<String>, RecipeError> {
        self.values
            .iter()
            .map(|v| {
                v.as_text().map(str::to_string).ok_or_else(|| invalid_value(
                    &self.name,
                    "expected string values",
                ))
            })
            .collect()
    }

    /// The single string value of a scalar tag.
    fn single_string(&self) -> Result<String, RecipeError> {
        match self.values.as_slice() {
            [SdlValue::Text(s)] => Ok(s.clone()),
            _ => Err(invalid_value(&self.name, "expected exactly one string value")),
        }
    }

    /// The platform-filter suffix from a `platform="..."` attribute.
    fn platform_suffix(&self) -> Result<String, RecipeError> {
        match self.attribute("platform") {
            None => Ok(String::new()),
            Some(v) => v
                .as_text()
                .map(|s| s.trim_start_matches('-').to_string())
                .ok_or_else(|| invalid_value(&self.name, "'platform' must be a string")),
        }
    }
}

fn invalid_value(attribute: &str, message: &str) -> RecipeError {
    RecipeError::InvalidValue {
        attribute: attribute.to_string(),
        message: message.to_string(),
    }
}

fn malformed(line: usize, message: impl Into<String>) -> RecipeError {
    RecipeError::MalformedSyntax(format!("line {line}: {}", message.into()))
}

// ========== Parsing ==========

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn line(&self) -> usize {
        self.peek().map_or_else(
            || self.tokens.last().map_or(1, |t| t.line),
            |t| t.line,
        )
    }

    fn parse_document(&mut self, depth: usize) -> Result<Vec<SdlTag>, RecipeError> {
        let mut tags = Vec::new();
        loop {
            while matches!(
                self.peek().map(|t| t.kind),
                Some(TokenKind::Newline | TokenKind::Semicolon)
            ) {
                self.pos += 1;
            }
            match self.peek().map(|t| t.kind) {
                None => {
                    if depth > 0 {
                        return Err(malformed(self.line(), "unclosed '{' block"));
                    }
                    return Ok(tags);
                }
                Some(TokenKind::BlockEnd) => {
                    if depth == 0 {
                        return Err(malformed(self.line(), "unmatched '}'"));
                    }
                    return Ok(tags);
                }
                Some(TokenKind::Ident) => tags.push(self.parse_tag(depth)?),
                Some(other) => {
                    return Err(malformed(self.line(), format!("expected a tag name, found {other:?}")))
                }
            }
        }
    }

    fn parse_tag(&mut self, depth: usize) -> Result<SdlTag, RecipeError> {
        let name_token = self.bump().ok_or_else(|| malformed(self.line(), "expected tag"))?;
        let mut tag = SdlTag {
            name: name_token.text.to_string(),
            line: name_token.line,
            ..SdlTag::default()
        };

        // values come first
        while let Some(token) = self.peek().filter(|t| t.kind.is_value()).cloned() {
            self.pos += 1;
            tag.values.push(value_of(&token));
        }

        // then attributes
        while let Some(name) = self.peek().filter(|t| t.kind == TokenKind::Ident).cloned() {
            self.pos += 1;
            match self.peek().map(|t| t.kind) {
                Some(TokenKind::Assign) => {
                    self.pos += 1;
                }
                _ => {
                    return Err(malformed(
                        name.line,
                        format!("expected '=' after attribute '{}'", name.text),
                    ))
                }
            }
            let value = self
                .bump()
                .filter(|t| t.kind.is_value())
                .ok_or_else(|| {
                    malformed(name.line, format!("expected a value for attribute '{}'", name.text))
                })?;
            tag.attributes.push((name.text.to_string(), value_of(&value)));
        }

        // then an optional children block
        if self.peek().is_some_and(|t| t.kind == TokenKind::BlockStart) {
            self.pos += 1;
            tag.children = self.parse_document(depth + 1)?;
            match self.bump().map(|t| t.kind) {
                Some(TokenKind::BlockEnd) => {}
                _ => return Err(malformed(tag.line, "unclosed '{' block")),
            }
        }

        // the tag ends at a newline, ';', '}' or end of input
        match self.peek().map(|t| t.kind) {
            None | Some(TokenKind::Newline | TokenKind::Semicolon | TokenKind::BlockEnd) => Ok(tag),
            Some(other) => Err(malformed(
                self.line(),
                format!("unexpected {other:?} after tag '{}'", tag.name),
            )),
        }
    }
}

fn value_of(token: &Token<'_>) -> SdlValue {
    match token.kind {
        TokenKind::StringLiteral => SdlValue::Text(unescape_string(token.text)),
        TokenKind::RawStringLiteral => {
            SdlValue::Text(token.text[1..token.text.len() - 1].to_string())
        }
        TokenKind::Integer => SdlValue::Int(token.text.parse().unwrap_or(0)),
        TokenKind::True | TokenKind::On => SdlValue::Bool(true),
        TokenKind::False | TokenKind::Off => SdlValue::Bool(false),
        TokenKind::Null => SdlValue::Null,
        _ => SdlValue::Null,
    }
}

fn parse_tags(text: &str) -> Result<Vec<SdlTag>, RecipeError> {
    let tokens = tokenize(text).map_err(|line| malformed(line, "unrecognized character"))?;
    Parser { tokens, pos: 0 }.parse_document(0)
}

// ========== Recipe mapping ==========

/// Decodes an SDL recipe.
///
/// `parent_name` is the qualified name of the enclosing package when
/// decoding a sub-package block; it is only used for diagnostics.
///
/// # Errors
///
/// Returns `MalformedSyntax` for surface-level errors and `InvalidValue`
/// for tag values of the wrong shape. Unknown tags log a warning.
pub fn decode(text: &str, parent_name: Option<&str>) -> Result<Recipe, RecipeError> {
    let tags = parse_tags(text)?;
    let mut recipe = recipe_from_tags(&tags, parent_name)?;
    apply_configuration_defaults(&mut recipe);
    recipe.validate()?;
    Ok(recipe)
}

fn recipe_from_tags(tags: &[SdlTag], parent_name: Option<&str>) -> Result<Recipe, RecipeError> {
    let mut recipe = Recipe::default();
    for tag in tags {
        match tag.name.as_str() {
            "name" => recipe.name = tag.single_string()?,
            "version" => recipe.version = Some(tag.single_string()?),
            "description" => recipe.description = Some(tag.single_string()?),
            "homepage" => recipe.homepage = Some(tag.single_string()?),
            "copyright" => recipe.copyright = Some(tag.single_string()?),
            "license" => recipe.license = Some(tag.single_string()?),
            "authors" => recipe.authors.extend(tag.string_values()?),
            "configuration" => {
                let name = tag.single_string()?;
                let mut config = ConfigurationInfo {
                    name,
                    ..ConfigurationInfo::default()
                };
                for child in &tag.children {
                    match child.name.as_str() {
                        "platforms" => config.platforms.extend(child.string_values()?),
                        _ => apply_build_setting_tag(&mut config.build, child)?,
                    }
                }
                recipe.configurations.push(config);
            }
            "buildType" => {
                let name = tag.single_string()?;
                let mut template = BuildSettingsTemplate::default();
                for child in &tag.children {
                    apply_build_setting_tag(&mut template, child)?;
                }
                recipe.build_types.insert(name, template);
            }
            "subPackage" => {
                if tag.children.is_empty() {
                    recipe.sub_packages.push(SubPackage::Path(tag.single_string()?));
                } else {
                    if !tag.values.is_empty() {
                        return Err(invalid_value(
                            "subPackage",
                            "an inline sub-package takes no path value",
                        ));
                    }
                    let parent = if recipe.name.is_empty() {
                        parent_name.unwrap_or("")
                    } else {
                        &recipe.name
                    };
                    let sub = recipe_from_tags(&tag.children, Some(parent))?;
                    recipe.sub_packages.push(SubPackage::Inline(Box::new(sub)));
                }
            }
            _ => apply_recipe_level_setting(&mut recipe, tag, parent_name)?,
        }
    }
    Ok(recipe)
}

fn apply_recipe_level_setting(
    recipe: &mut Recipe,
    tag: &SdlTag,
    parent_name: Option<&str>,
) -> Result<(), RecipeError> {
    if tag.name.contains(':') {
        debug!(tag = tag.name.as_str(), "skipping namespaced tag");
        return Ok(());
    }
    if is_build_setting_tag(&tag.name) {
        apply_build_setting_tag(&mut recipe.build, tag)
    } else {
        warn!(
            tag = tag.name.as_str(),
            line = tag.line,
            package = parent_name.unwrap_or(&recipe.name),
            "ignoring unknown recipe tag"
        );
        Ok(())
    }
}

fn is_build_setting_tag(name: &str) -> bool {
    matches!(
        name,
        "targetType"
            | "targetName"
            | "targetPath"
            | "workingDirectory"
            | "mainSourceFile"
            | "dependency"
            | "subConfiguration"
            | "buildRequirements"
            | "buildOptions"
    ) || ListField::from_key(name).is_some()
}

fn apply_build_setting_tag(
    template: &mut BuildSettingsTemplate,
    tag: &SdlTag,
) -> Result<(), RecipeError> {
    if tag.name.contains(':') {
        debug!(tag = tag.name.as_str(), "skipping namespaced tag");
        return Ok(());
    }
    match tag.name.as_str() {
        "targetType" => {
            let text = tag.single_string()?;
            template.target_type = Some(text.parse().map_err(
                |e: crate::settings::UnknownNameError| invalid_value("targetType", &e.to_string()),
            )?);
        }
        "targetName" => template.target_name = Some(tag.single_string()?),
        "targetPath" => template.target_path = Some(tag.single_string()?),
        "workingDirectory" => template.working_directory = Some(tag.single_string()?),
        "mainSourceFile" => template.main_source_file = Some(tag.single_string()?),
        "dependency" => {
            let (name, dep) = dependency_from_tag(tag)?;
            template.dependencies.insert(name, dep);
        }
        "subConfiguration" => {
            let values = tag.string_values()?;
            match values.as_slice() {
                [pkg, config] => {
                    template
                        .sub_configurations
                        .insert(pkg.clone(), config.clone());
                }
                _ => {
                    return Err(invalid_value(
                        "subConfiguration",
                        "expected a package name and a configuration name",
                    ))
                }
            }
        }
        "buildRequirements" => {
            let mut flags = BuildRequirements::none();
            for name in tag.string_values()? {
                flags.insert(name.parse().map_err(
                    |e: crate::settings::UnknownNameError| {
                        invalid_value("buildRequirements", &e.to_string())
                    },
                )?);
            }
            template.build_requirements.add(tag.platform_suffix()?, flags);
        }
        "buildOptions" => {
            let mut flags = BuildOptions::none();
            for name in tag.string_values()? {
                flags.insert(name.parse().map_err(
                    |e: crate::settings::UnknownNameError| {
                        invalid_value("buildOptions", &e.to_string())
                    },
                )?);
            }
            template.build_options.add(tag.platform_suffix()?, flags);
        }
        other => match ListField::from_key(other) {
            Some(field) => {
                let suffix = tag.platform_suffix()?;
                template.list_mut(field).add(suffix, tag.string_values()?);
            }
            None => {
                warn!(tag = other, line = tag.line, "ignoring unknown build-settings tag");
            }
        },
    }
    Ok(())
}

fn dependency_from_tag(tag: &SdlTag) -> Result<(String, Dependency), RecipeError> {
    let name = tag.single_string()?;
    let mut dep = if let Some(path) = tag.attribute("path") {
        // a path always wins over a version given alongside it
        let path = path
            .as_text()
            .ok_or_else(|| invalid_value("dependency", "'path' must be a string"))?;
        Dependency::path(path)
    } else if let Some(version) = tag.attribute("version") {
        let spec = version
            .as_text()
            .ok_or_else(|| invalid_value("dependency", "'version' must be a string"))?;
        spec.parse()
            .map_err(|e: crate::dependency::DependencyError| {
                invalid_value(&format!("dependency '{name}'"), &e.to_string())
            })?
    } else {
        Dependency::any()
    };
    if let Some(optional) = tag.attribute("optional") {
        dep.optional = optional
            .as_bool()
            .ok_or_else(|| invalid_value("dependency", "'optional' must be a boolean"))?;
    }
    if let Some(default) = tag.attribute("default") {
        dep.is_default = default
            .as_bool()
            .ok_or_else(|| invalid_value("dependency", "'default' must be a boolean"))?;
    }
    Ok((name, dep))
}

// ========== Encoding ==========

/// Encodes a recipe as SDL text.
#[must_use]
pub fn encode(recipe: &Recipe) -> String {
    let mut out = String::new();
    emit_recipe(recipe, &mut out, 0);
    out
}

fn emit_recipe(recipe: &Recipe, out: &mut String, indent: usize) {
    emit_scalar(out, indent, "name", Some(recipe.name.as_str()));
    emit_scalar(out, indent, "version", recipe.version.as_deref());
    emit_scalar(out, indent, "description", recipe.description.as_deref());
    emit_scalar(out, indent, "homepage", recipe.homepage.as_deref());
    if !recipe.authors.is_empty() {
        emit_values(out, indent, "authors", &recipe.authors, "");
    }
    emit_scalar(out, indent, "copyright", recipe.copyright.as_deref());
    emit_scalar(out, indent, "license", recipe.license.as_deref());

    emit_template(&recipe.build, out, indent);

    for config in &recipe.configurations {
        emit_line(out, indent, &format!("configuration {} {{", quote(&config.name)));
        if !config.platforms.is_empty() {
            emit_values(out, indent + 1, "platforms", &config.platforms, "");
        }
        emit_template(&config.build, out, indent + 1);
        emit_line(out, indent, "}");
    }

    for (name, template) in &recipe.build_types {
        emit_line(out, indent, &format!("buildType {} {{", quote(name)));
        emit_template(template, out, indent + 1);
        emit_line(out, indent, "}");
    }

    for sub in &recipe.sub_packages {
        match sub {
            SubPackage::Path(path) => emit_line(out, indent, &format!("subPackage {}", quote(path))),
            SubPackage::Inline(sub_recipe) => {
                emit_line(out, indent, "subPackage {");
                emit_recipe(sub_recipe, out, indent + 1);
                emit_line(out, indent, "}");
            }
        }
    }
}

fn emit_template(template: &BuildSettingsTemplate, out: &mut String, indent: usize) {
    if let Some(tt) = template.target_type {
        emit_scalar(out, indent, "targetType", Some(tt.as_str()));
    }
    emit_scalar(out, indent, "targetName", template.target_name.as_deref());
    emit_scalar(out, indent, "targetPath", template.target_path.as_deref());
    emit_scalar(
        out,
        indent,
        "workingDirectory",
        template.working_directory.as_deref(),
    );
    emit_scalar(
        out,
        indent,
        "mainSourceFile",
        template.main_source_file.as_deref(),
    );

    for (name, dep) in &template.dependencies {
        let mut line = format!("dependency {}", quote(name));
        match &dep.spec {
            crate::dependency::DependencySpec::Path(path) => {
                line.push_str(&format!(" path={}", quote(&path.to_string_lossy())));
            }
            _ => line.push_str(&format!(" version={}", quote(&dep.to_string()))),
        }
        if dep.optional {
            line.push_str(" optional=true");
        }
        if dep.is_default {
            line.push_str(" default=true");
        }
        emit_line(out, indent, &line);
    }

    for (pkg, config) in &template.sub_configurations {
        emit_line(
            out,
            indent,
            &format!("subConfiguration {} {}", quote(pkg), quote(config)),
        );
    }

    for field in ListField::ALL {
        for (suffix, values) in template.list(*field).entries() {
            emit_values(out, indent, field.key(), values, suffix);
        }
    }
    for (suffix, flags) in template.build_requirements.entries() {
        let names: Vec<String> = flags.names().iter().map(|s| (*s).to_string()).collect();
        emit_values(out, indent, "buildRequirements", &names, suffix);
    }
    for (suffix, flags) in template.build_options.entries() {
        let names: Vec<String> = flags.names().iter().map(|s| (*s).to_string()).collect();
        emit_values(out, indent, "buildOptions", &names, suffix);
    }
}

fn emit_scalar(out: &mut String, indent: usize, tag: &str, value: Option<&str>) {
    if let Some(value) = value {
        emit_line(out, indent, &format!("{tag} {}", quote(value)));
    }
}

fn emit_values(out: &mut String, indent: usize, tag: &str, values: &[String], suffix: &str) {
    let mut line = String::from(tag);
    for value in values {
        line.push(' ');
        line.push_str(&quote(value));
    }
    if !suffix.is_empty() {
        line.push_str(&format!(" platform={}", quote(suffix)));
    }
    emit_line(out, indent, &line);
}

fn emit_line(out: &mut String, indent: usize, text: &str) {
    for _ in 0..indent {
        out.push('\t');
    }
    out.push_str(text);
    out.push('\n');
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TargetType;

    #[test]
    fn decode_minimal() {
        let recipe = decode("name \"demo\"\nversion \"1.0.0\"\n", None).unwrap();
        assert_eq!(recipe.name, "demo");
        assert_eq!(recipe.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn empty_configuration_defaults_to_library() {
        let recipe = decode("name \"test\"\nconfiguration \"a\" {\n}\n", None).unwrap();
        assert_eq!(recipe.configurations.len(), 1);
        assert_eq!(recipe.configurations[0].name, "a");
        assert_eq!(
            recipe.configurations[0].build.target_type,
            Some(TargetType::Library)
        );
    }

    #[test]
    fn configuration_inherits_autodetect_as_library() {
        let input = "name \"test\"\ntargetType \"autodetect\"\nconfiguration \"a\" {\n}\n";
        let recipe = decode(input, None).unwrap();
        assert_eq!(
            recipe.configurations[0].build.target_type,
            Some(TargetType::Library)
        );
    }

    #[test]
    fn configuration_inherits_explicit_executable() {
        let input = "name \"test\"\ntargetType \"executable\"\nconfiguration \"a\" {\n}\n";
        let recipe = decode(input, None).unwrap();
        assert_eq!(
            recipe.configurations[0].build.target_type,
            Some(TargetType::Executable)
        );
    }

    #[test]
    fn decode_dependencies_and_platform_tags() {
        let input = concat!(
            "name \"demo\"\n",
            "dependency \"ranged\" version=\">=1.0.0 <2.0.0\"\n",
            "dependency \"local\" path=\"../local\" optional=true\n",
            "dflags \"-a\" \"-b\"\n",
            "dflags \"-w\" platform=\"windows\"\n",
            "buildOptions \"debugMode\" \"debugInfo\" platform=\"linux\"\n",
        );
        let recipe = decode(input, None).unwrap();
        assert!(recipe.build.dependencies["ranged"]
            .matches(&"1.5.0".parse().unwrap()));
        assert!(recipe.build.dependencies["local"].optional);
        let entries: Vec<_> = recipe.build.dflags.entries().collect();
        assert_eq!(entries[0].0, "");
        assert_eq!(entries[1], ("windows", &vec!["-w".to_string()]));
        let (suffix, _) = recipe.build.build_options.entries().next().unwrap();
        assert_eq!(suffix, "linux");
    }

    #[test]
    fn repeated_tags_accumulate() {
        let input = "name \"demo\"\nauthors \"a\"\nauthors \"b\" \"c\"\n";
        let recipe = decode(input, None).unwrap();
        assert_eq!(recipe.authors, vec!["a", "b", "c"]);
    }

    #[test]
    fn decode_sub_packages() {
        let input = concat!(
            "name \"base\"\n",
            "subPackage \"component\"\n",
            "subPackage {\n",
            "\tname \"inline\"\n",
            "\ttargetType \"library\"\n",
            "}\n",
        );
        let recipe = decode(input, None).unwrap();
        assert_eq!(recipe.sub_packages.len(), 2);
        assert!(matches!(&recipe.sub_packages[1], SubPackage::Inline(r) if r.name == "inline"));
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let recipe = decode("name \"demo\"\nfrobnicate \"x\"\nx:custom \"y\"\n", None).unwrap();
        assert_eq!(recipe.name, "demo");
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            decode("name \"demo\" {\n", None),
            Err(RecipeError::MalformedSyntax(_))
        ));
        assert!(matches!(
            decode("\"anonymous\"\n", None),
            Err(RecipeError::MalformedSyntax(_))
        ));
        assert!(matches!(
            decode("name \"demo\"\ntargetType \"shared\"\n", None),
            Err(RecipeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn round_trip() {
        let input = concat!(
            "name \"demo\"\n",
            "version \"1.2.3\"\n",
            "license \"MIT\"\n",
            "targetType \"library\"\n",
            "dependency \"dep\" version=\"^1.0.0\"\n",
            "dependency \"local\" path=\"sub\" optional=true default=true\n",
            "dflags \"-a\"\n",
            "libs \"z\" platform=\"posix\"\n",
            "buildRequirements \"allowWarnings\"\n",
            "configuration \"default\" {\n",
            "\tplatforms \"linux\"\n",
            "\tsubConfiguration \"dep\" \"lite\"\n",
            "}\n",
            "buildType \"custom\" {\n",
            "\tdflags \"-custom\"\n",
            "}\n",
            "subPackage \"component\"\n",
        );
        let first = decode(input, None).unwrap();
        let encoded = encode(&first);
        let second = decode(&encoded, None).unwrap();
        assert_eq!(first, second);
    }
}
