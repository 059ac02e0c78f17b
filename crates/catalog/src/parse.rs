//! Catalog parsing and the lexical rules for ids, parameter names and target paths.

use std::path::{Component, Path};

use crate::{
    Error, Result,
    types::{CatalogFile, ModuleDescriptor},
};

/// Catalog file formats, picked by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Toml,
    Yaml,
    Json,
}

impl CatalogFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())? {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse a catalog document, keeping module declaration order.
pub fn parse_catalog(raw: &str, format: CatalogFormat) -> Result<Vec<ModuleDescriptor>> {
    let file: CatalogFile = match format {
        CatalogFormat::Toml => toml::from_str(raw)?,
        CatalogFormat::Yaml => serde_yaml::from_str(raw)?,
        CatalogFormat::Json => serde_json::from_str(raw)?,
    };
    Ok(file.modules)
}

/// Read and parse a catalog file.
pub fn read_catalog(path: &Path) -> Result<Vec<ModuleDescriptor>> {
    let format = CatalogFormat::from_path(path).ok_or_else(|| Error::unsupported_format(path))?;
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    parse_catalog(&raw, format)
}

/// Validate a module id: lowercase ASCII segments of alphanumerics, `-` and
/// `_`, joined by single `/`, 1-128 chars.
pub fn validate_module_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
                && !segment.starts_with('-')
                && !segment.ends_with('-')
        })
}

/// Parameter names are ASCII identifiers (`-` allowed). Dots are reserved
/// for `module.param` override keys.
pub fn validate_parameter_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Check that a target path stays inside the target root.
///
/// Returns the reason on failure.
pub fn validate_target_path(path: &str) -> std::result::Result<(), String> {
    if path.trim().is_empty() {
        return Err("target path is empty".into());
    }
    if path.contains('\\') {
        return Err(format!("target path '{path}' must use '/' separators"));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => {},
            Component::CurDir => {
                return Err(format!("target path '{path}' must not contain '.' segments"));
            },
            Component::ParentDir => {
                return Err(format!("target path '{path}' escapes the target root"));
            },
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("target path '{path}' must be relative"));
            },
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::DefaultStrategy, rstest::rstest};

    #[rstest]
    #[case("foundation", true)]
    #[case("languages/python", true)]
    #[case("infra/docker_compose/v2", true)]
    #[case("", false)]
    #[case("Languages/python", false)]
    #[case("languages//python", false)]
    #[case("/python", false)]
    #[case("python/", false)]
    #[case("-python", false)]
    #[case("py thon", false)]
    fn module_id_rules(#[case] id: &str, #[case] valid: bool) {
        assert_eq!(validate_module_id(id), valid, "{id}");
    }

    #[rstest]
    #[case("installPath", true)]
    #[case("line-length", true)]
    #[case("a.b", false)]
    #[case("", false)]
    fn parameter_name_rules(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_parameter_name(name), valid, "{name}");
    }

    #[rstest]
    #[case("pyproject.toml")]
    #[case(".github/workflows/ci.yml")]
    fn accepts_relative_targets(#[case] path: &str) {
        assert!(validate_target_path(path).is_ok());
    }

    #[rstest]
    #[case("/etc/passwd")]
    #[case("../outside.txt")]
    #[case("a/../../b")]
    #[case("./a")]
    #[case("")]
    #[case("dir\\file")]
    fn rejects_escaping_targets(#[case] path: &str) {
        assert!(validate_target_path(path).is_err(), "{path}");
    }

    #[test]
    fn parses_toml_catalog_in_order() {
        let raw = r#"
[[modules]]
id = "foundation"

[[modules]]
id = "languages/python"
depends_on = ["foundation"]

[[modules.parameters]]
name = "installPath"
default = { strategy = "literal", value = "." }

[[modules]]
id = "infra/docker"
status = "experimental"
depends_on = ["languages/python"]
targets = [{ path = "Dockerfile", template = "docker/Dockerfile.tmpl" }]
"#;
        let modules = parse_catalog(raw, CatalogFormat::Toml).unwrap();
        let ids: Vec<_> = modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["foundation", "languages/python", "infra/docker"]);
        assert_eq!(
            modules[1].parameters[0].default,
            DefaultStrategy::literal(".")
        );
        assert_eq!(
            modules[2].targets[0].template.as_deref(),
            Some("docker/Dockerfile.tmpl")
        );
    }

    #[test]
    fn parses_yaml_catalog() {
        let raw = r#"
modules:
  - id: foundation
  - id: languages/python
    depends_on: [foundation]
    parameters:
      - name: packageManager
        required: true
        default:
          strategy: auto-detect
          detector: marker-file
          args: [poetry.lock, uv.lock]
          fallback: pip
"#;
        let modules = parse_catalog(raw, CatalogFormat::Yaml).unwrap();
        assert_eq!(modules.len(), 2);
        match &modules[1].parameters[0].default {
            DefaultStrategy::AutoDetect {
                detector,
                args,
                fallback,
            } => {
                assert_eq!(detector, "marker-file");
                assert_eq!(args.len(), 2);
                assert_eq!(fallback.as_ref().and_then(|v| v.as_str()), Some("pip"));
            },
            other => panic!("unexpected strategy {other:?}"),
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = read_catalog(Path::new("catalog.ini")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }
}
