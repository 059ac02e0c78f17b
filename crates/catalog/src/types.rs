use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

// ── Catalog file ────────────────────────────────────────────────────────────

/// On-disk catalog layout: a version marker and an ordered module list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
}

fn default_version() -> u32 {
    1
}

// ── Module descriptor ───────────────────────────────────────────────────────

/// Lifecycle status of a module. Only `stable` modules are picked up by
/// automatic selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    #[default]
    Stable,
    Experimental,
    Planned,
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Experimental => write!(f, "experimental"),
            Self::Planned => write!(f, "planned"),
        }
    }
}

/// Immutable metadata describing one installable module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Namespaced id, e.g. `languages/python`.
    pub id: String,
    /// Explicit category. Falls back to the id namespace, see [`Self::category`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ModuleStatus,
    /// Ids of modules that must be installed first.
    #[serde(default, alias = "dependency_ids", alias = "dependencies")]
    pub depends_on: Vec<String>,
    /// Configurable parameters, in declaration order.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Target paths this module may write, relative to the target root.
    #[serde(default)]
    pub targets: Vec<TargetDecl>,
}

impl ModuleDescriptor {
    /// Minimal stable descriptor with no dependencies, parameters or targets.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: None,
            description: String::new(),
            status: ModuleStatus::Stable,
            depends_on: Vec::new(),
            parameters: Vec::new(),
            targets: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: TargetDecl) -> Self {
        self.targets.push(target);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ModuleStatus) -> Self {
        self.status = status;
        self
    }

    /// Category, defaulting to the id namespace (`linters/ruff` → `linters`).
    #[must_use]
    pub fn category(&self) -> &str {
        if let Some(ref c) = self.category {
            return c;
        }
        match self.id.rsplit_once('/') {
            Some((ns, _)) => ns,
            None => "uncategorized",
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn declares_target(&self, path: &str) -> bool {
        self.targets.iter().any(|t| t.path == path)
    }
}

// ── Parameters ──────────────────────────────────────────────────────────────

/// How a parameter gets its value when the caller does not override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum DefaultStrategy {
    /// A fixed value from the catalog.
    Literal {
        #[serde(default)]
        value: Value,
    },
    /// Computed by a named detector inspecting the target tree. `fallback`
    /// is used as a literal default when detection finds nothing.
    AutoDetect {
        detector: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Value>,
    },
    /// Ask the operator. Fails in batch mode unless overridden.
    PromptUser {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
}

impl DefaultStrategy {
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn auto_detect(detector: impl Into<String>, args: &[&str]) -> Self {
        Self::AutoDetect {
            detector: detector.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            fallback: None,
        }
    }

    #[must_use]
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::PromptUser {
            prompt: Some(prompt.into()),
        }
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Literal { .. } => "literal",
            Self::AutoDetect { .. } => "auto-detect",
            Self::PromptUser { .. } => "prompt-user",
        }
    }
}

/// One configurable parameter of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "default_strategy")]
    pub default: DefaultStrategy,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, default: DefaultStrategy) -> Self {
        Self {
            name: name.into(),
            description: None,
            default,
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

// ── Targets ─────────────────────────────────────────────────────────────────

/// A file in the target tree a module is allowed to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDecl {
    /// Relative path inside the target root, `/`-separated.
    pub path: String,
    /// Template file, relative to the catalog file, used by the template
    /// installer to render this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl TargetDecl {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            template: None,
        }
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_falls_back_to_namespace() {
        assert_eq!(ModuleDescriptor::new("linters/ruff").category(), "linters");
        assert_eq!(
            ModuleDescriptor::new("infra/docker/compose").category(),
            "infra/docker"
        );
        assert_eq!(ModuleDescriptor::new("foundation").category(), "uncategorized");

        let mut explicit = ModuleDescriptor::new("linters/ruff");
        explicit.category = Some("quality".into());
        assert_eq!(explicit.category(), "quality");
    }

    #[test]
    fn strategy_is_internally_tagged() {
        let spec: ParameterSpec = serde_json::from_str(
            r#"{"name":"installPath","default":{"strategy":"literal","value":"."}}"#,
        )
        .unwrap();
        assert_eq!(spec.default, DefaultStrategy::literal("."));
        assert!(!spec.required);

        let spec: ParameterSpec = serde_json::from_str(
            r#"{"name":"pm","required":true,"default":{"strategy":"auto-detect","detector":"marker-file","args":["poetry.lock"]}}"#,
        )
        .unwrap();
        assert!(spec.required);
        assert_eq!(spec.default.kind(), "auto-detect");
    }

    #[test]
    fn dependency_ids_alias_is_accepted() {
        let d: ModuleDescriptor =
            serde_json::from_str(r#"{"id":"docker","dependency_ids":["python"]}"#).unwrap();
        assert_eq!(d.depends_on, vec!["python"]);
        assert_eq!(d.status, ModuleStatus::Stable);
    }
}
