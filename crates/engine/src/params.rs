//! Parameter resolution.
//!
//! Each parameter takes the first value found, in this order:
//! caller override, auto-detected value, literal default, operator prompt.
//! Batch runs never prompt, so a parameter that would need an answer fails
//! its module unless an override supplies it. Interactive runs also ask for
//! a required parameter that detection and defaults left empty.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use {
    modsmith_catalog::{DefaultStrategy, ModuleDescriptor, ParameterSpec},
    modsmith_config::RunMode,
    modsmith_ledger::Parameters,
    serde_json::Value,
    tracing::debug,
};

use crate::error::{ParameterError, ParameterFailure};

// ── Overrides ───────────────────────────────────────────────────────────────

/// Caller-supplied parameter values.
///
/// A global value applies to every module declaring the parameter; a scoped
/// value (`module/id.param`) applies to one module and wins over a global.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    global: BTreeMap<String, Value>,
    scoped: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Overrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat map such as the config `[overrides]` table.
    #[must_use]
    pub fn from_map(map: &BTreeMap<String, Value>) -> Self {
        let mut overrides = Self::new();
        for (key, value) in map {
            overrides.insert(key, value.clone());
        }
        overrides
    }

    /// Parameters a parent module resolved, handed down to a nested run.
    #[must_use]
    pub fn for_nested(resolved: &Parameters) -> Self {
        Self {
            global: resolved.clone(),
            scoped: BTreeMap::new(),
        }
    }

    /// `key` is `param` or `module/id.param`. Parameter names never contain
    /// a dot, so the last one separates the module id.
    pub fn insert(&mut self, key: &str, value: Value) {
        match key.rsplit_once('.') {
            Some((module, param)) => {
                self.scoped
                    .entry(module.to_string())
                    .or_default()
                    .insert(param.to_string(), value);
            },
            None => {
                self.global.insert(key.to_string(), value);
            },
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    /// Parse `key=value`. The value is read as JSON when it parses, otherwise
    /// taken as a plain string, so `--set strict=true` gives a boolean and
    /// `--set path=./src` gives a string.
    pub fn insert_assignment(&mut self, assignment: &str) -> Result<(), String> {
        let Some((key, raw)) = assignment.split_once('=') else {
            return Err(format!("expected KEY=VALUE, got '{assignment}'"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty key in '{assignment}'"));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.insert(key, value);
        Ok(())
    }

    /// Layer `other` on top of `self`; values in `other` win.
    pub fn extend(&mut self, other: Self) {
        self.global.extend(other.global);
        for (module, params) in other.scoped {
            self.scoped.entry(module).or_default().extend(params);
        }
    }

    #[must_use]
    pub fn get(&self, module_id: &str, param: &str) -> Option<&Value> {
        self.scoped
            .get(module_id)
            .and_then(|p| p.get(param))
            .or_else(|| self.global.get(param))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.scoped.is_empty()
    }
}

// ── Detectors ───────────────────────────────────────────────────────────────

/// A read-only query against the target tree.
pub trait Detector: Send + Sync {
    /// `None`, an empty string, or null all mean "nothing found".
    fn detect(&self, target_root: &Path, args: &[String]) -> Option<Value>;
}

impl<F> Detector for F
where
    F: Fn(&Path, &[String]) -> Option<Value> + Send + Sync,
{
    fn detect(&self, target_root: &Path, args: &[String]) -> Option<Value> {
        self(target_root, args)
    }
}

/// First of `args` that exists as a path under the target root.
pub struct MarkerFileDetector;

impl Detector for MarkerFileDetector {
    fn detect(&self, target_root: &Path, args: &[String]) -> Option<Value> {
        args.iter()
            .find(|rel| target_root.join(rel.as_str()).exists())
            .map(|rel| Value::String(rel.clone()))
    }
}

/// First of `args` found as an executable on `PATH`.
pub struct BinDetector;

impl Detector for BinDetector {
    fn detect(&self, _target_root: &Path, args: &[String]) -> Option<Value> {
        let path_var = std::env::var_os("PATH")?;
        let dirs: Vec<PathBuf> = std::env::split_paths(&path_var).collect();
        args.iter()
            .find(|name| dirs.iter().any(|dir| is_executable(&dir.join(name.as_str()))))
            .map(|name| Value::String(name.clone()))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Value of the first set variable among `args`.
pub struct EnvDetector {
    lookup: EnvLookup,
}

impl EnvDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    #[must_use]
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }
}

impl Default for EnvDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for EnvDetector {
    fn detect(&self, _target_root: &Path, args: &[String]) -> Option<Value> {
        args.iter()
            .filter_map(|name| (self.lookup)(name))
            .find(|v| !v.is_empty())
            .map(Value::String)
    }
}

/// Detectors by name.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `marker-file`, `bin` and `env`.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with("marker-file", MarkerFileDetector)
            .with("bin", BinDetector)
            .with("env", EnvDetector::new())
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, detector: impl Detector + 'static) -> Self {
        self.register(name, detector);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, detector: impl Detector + 'static) {
        self.detectors.insert(name.into(), Arc::new(detector));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Detector>> {
        self.detectors.get(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.detectors.keys().cloned().collect();
        names.sort();
        names
    }
}

// ── Prompting ───────────────────────────────────────────────────────────────

/// Asks the operator for a parameter value in interactive runs.
///
/// `Ok(None)` means the operator gave no answer.
pub trait Prompter: Send + Sync {
    fn ask(&self, module: &ModuleDescriptor, spec: &ParameterSpec) -> Result<Option<Value>, String>;
}

// ── Resolver ────────────────────────────────────────────────────────────────

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Computes the final parameter values of a module.
pub struct ParameterResolver {
    mode: RunMode,
    target_root: PathBuf,
    detectors: DetectorRegistry,
    prompter: Option<Arc<dyn Prompter>>,
    /// One prompt at a time when several modules resolve concurrently.
    prompt_lock: Mutex<()>,
}

impl ParameterResolver {
    #[must_use]
    pub fn new(mode: RunMode, target_root: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            target_root: target_root.into(),
            detectors: DetectorRegistry::with_builtins(),
            prompter: None,
            prompt_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_detectors(mut self, detectors: DetectorRegistry) -> Self {
        self.detectors = detectors;
        self
    }

    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn detectors(&self) -> &DetectorRegistry {
        &self.detectors
    }

    /// Resolve every parameter of `module` in declaration order.
    ///
    /// Optional parameters that end up with no value are left out of the
    /// result. May block on detector I/O or an operator prompt.
    pub fn resolve(
        &self,
        module: &ModuleDescriptor,
        overrides: &Overrides,
    ) -> Result<Parameters, ParameterError> {
        let mut resolved = Parameters::new();
        for spec in &module.parameters {
            match self.resolve_one(module, spec, overrides)? {
                Some(value) => {
                    resolved.insert(spec.name.clone(), value);
                },
                None if spec.required => {
                    return Err(ParameterError::new(
                        &module.id,
                        &spec.name,
                        ParameterFailure::Unresolved,
                    ));
                },
                None => {
                    debug!(module = %module.id, parameter = %spec.name, "optional parameter left unset");
                },
            }
        }
        Ok(resolved)
    }

    fn resolve_one(
        &self,
        module: &ModuleDescriptor,
        spec: &ParameterSpec,
        overrides: &Overrides,
    ) -> Result<Option<Value>, ParameterError> {
        let fail = |failure| ParameterError::new(&module.id, &spec.name, failure);

        if let Some(value) = overrides.get(&module.id, &spec.name) {
            debug!(module = %module.id, parameter = %spec.name, "using override");
            return Ok(Some(value.clone()));
        }

        let value = match &spec.default {
            DefaultStrategy::AutoDetect {
                detector,
                args,
                fallback,
            } => {
                let detector_impl = self
                    .detectors
                    .get(detector)
                    .ok_or_else(|| fail(ParameterFailure::UnknownDetector(detector.clone())))?;
                if let Some(value) = detector_impl
                    .detect(&self.target_root, args)
                    .filter(|v| !is_empty_value(v))
                {
                    debug!(module = %module.id, parameter = %spec.name, %detector, "detected value");
                    return Ok(Some(value));
                }
                fallback.clone().filter(|v| !is_empty_value(v))
            },
            DefaultStrategy::Literal { value } => Some(value.clone()),
            DefaultStrategy::PromptUser { .. } => {
                return self.prompt(module, spec).map_err(fail);
            },
        };

        // An interactive run asks rather than fail on a required parameter.
        if value.is_none() && spec.required && self.mode == RunMode::Interactive {
            debug!(module = %module.id, parameter = %spec.name, "nothing detected, asking");
            return self.prompt(module, spec).map_err(fail);
        }
        Ok(value)
    }

    fn prompt(
        &self,
        module: &ModuleDescriptor,
        spec: &ParameterSpec,
    ) -> Result<Option<Value>, ParameterFailure> {
        match self.mode {
            RunMode::Batch => Err(ParameterFailure::PromptInBatch),
            RunMode::Interactive => {
                let prompter = self.prompter.as_ref().ok_or(ParameterFailure::NoPrompter)?;
                let _guard = self.prompt_lock.lock().unwrap_or_else(|e| e.into_inner());
                let answer = prompter.ask(module, spec).map_err(ParameterFailure::Prompt)?;
                Ok(answer.filter(|v| !is_empty_value(v)))
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    struct Scripted(Option<Value>);

    impl Prompter for Scripted {
        fn ask(&self, _: &ModuleDescriptor, _: &ParameterSpec) -> Result<Option<Value>, String> {
            Ok(self.0.clone())
        }
    }

    fn module() -> ModuleDescriptor {
        ModuleDescriptor::new("lang/python")
            .with_parameter(ParameterSpec::new(
                "installPath",
                DefaultStrategy::literal("."),
            ))
            .with_parameter(ParameterSpec::new(
                "manager",
                DefaultStrategy::AutoDetect {
                    detector: "marker-file".into(),
                    args: vec!["poetry.lock".into(), "uv.lock".into()],
                    fallback: Some(json!("pip")),
                },
            ))
    }

    fn resolver(root: &Path) -> ParameterResolver {
        ParameterResolver::new(RunMode::Batch, root)
    }

    #[test]
    fn literal_and_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let params = resolver(tmp.path())
            .resolve(&module(), &Overrides::new())
            .unwrap();
        assert_eq!(params["installPath"], json!("."));
        assert_eq!(params["manager"], json!("pip"));
    }

    #[test]
    fn detected_beats_literal_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("uv.lock"), "").unwrap();
        let params = resolver(tmp.path())
            .resolve(&module(), &Overrides::new())
            .unwrap();
        assert_eq!(params["manager"], json!("uv.lock"));
    }

    #[test]
    fn override_beats_everything() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("uv.lock"), "").unwrap();
        let overrides = Overrides::new()
            .with("manager", "conda")
            .with("lang/python.installPath", "src");
        let params = resolver(tmp.path()).resolve(&module(), &overrides).unwrap();
        assert_eq!(params["manager"], json!("conda"));
        assert_eq!(params["installPath"], json!("src"));
    }

    #[test]
    fn scoped_override_wins_over_global() {
        let overrides = Overrides::new()
            .with("installPath", "global")
            .with("lang/python.installPath", "scoped");
        assert_eq!(
            overrides.get("lang/python", "installPath"),
            Some(&json!("scoped"))
        );
        assert_eq!(overrides.get("infra/docker", "installPath"), Some(&json!("global")));
    }

    #[test]
    fn prompt_in_batch_fails_naming_module_and_parameter() {
        let m = ModuleDescriptor::new("infra/docker").with_parameter(ParameterSpec::new(
            "registry",
            DefaultStrategy::prompt("Registry host?"),
        ));
        let err = resolver(Path::new("."))
            .resolve(&m, &Overrides::new())
            .unwrap_err();
        assert_eq!(err.module_id, "infra/docker");
        assert_eq!(err.parameter, "registry");
        assert_eq!(err.failure, ParameterFailure::PromptInBatch);

        let ok = resolver(Path::new("."))
            .resolve(&m, &Overrides::new().with("registry", "ghcr.io"))
            .unwrap();
        assert_eq!(ok["registry"], json!("ghcr.io"));
    }

    #[test]
    fn interactive_prompt_is_last_tier() {
        let m = ModuleDescriptor::new("infra/docker").with_parameter(
            ParameterSpec::new("registry", DefaultStrategy::prompt("Registry host?")).required(),
        );
        let interactive = ParameterResolver::new(RunMode::Interactive, ".")
            .with_prompter(Arc::new(Scripted(Some(json!("quay.io")))));
        assert_eq!(
            interactive.resolve(&m, &Overrides::new()).unwrap()["registry"],
            json!("quay.io")
        );

        let silent = ParameterResolver::new(RunMode::Interactive, ".")
            .with_prompter(Arc::new(Scripted(Some(json!("")))));
        let err = silent.resolve(&m, &Overrides::new()).unwrap_err();
        assert_eq!(err.failure, ParameterFailure::Unresolved);

        let detached = ParameterResolver::new(RunMode::Interactive, ".");
        let err = detached.resolve(&m, &Overrides::new()).unwrap_err();
        assert_eq!(err.failure, ParameterFailure::NoPrompter);
    }

    #[test]
    fn interactive_asks_when_required_detection_comes_up_empty() {
        let m = ModuleDescriptor::new("lang/python").with_parameter(
            ParameterSpec::new(
                "manager",
                DefaultStrategy::auto_detect("marker-file", &["poetry.lock"]),
            )
            .required(),
        );
        let tmp = tempfile::tempdir().unwrap();
        let interactive = ParameterResolver::new(RunMode::Interactive, tmp.path())
            .with_prompter(Arc::new(Scripted(Some(json!("answered")))));
        assert_eq!(
            interactive.resolve(&m, &Overrides::new()).unwrap()["manager"],
            json!("answered")
        );

        // a detected value still wins over asking
        std::fs::write(tmp.path().join("poetry.lock"), "").unwrap();
        assert_eq!(
            interactive.resolve(&m, &Overrides::new()).unwrap()["manager"],
            json!("poetry.lock")
        );

        // optional parameters are never asked for
        let optional = ModuleDescriptor::new("tools/lint").with_parameter(ParameterSpec::new(
            "config",
            DefaultStrategy::auto_detect("marker-file", &[".eslintrc"]),
        ));
        assert!(interactive.resolve(&optional, &Overrides::new()).unwrap().is_empty());
    }

    #[test]
    fn optional_without_value_is_omitted() {
        let m = ModuleDescriptor::new("tools/lint").with_parameter(ParameterSpec::new(
            "config",
            DefaultStrategy::auto_detect("marker-file", &[".eslintrc"]),
        ));
        let tmp = tempfile::tempdir().unwrap();
        let params = resolver(tmp.path()).resolve(&m, &Overrides::new()).unwrap();
        assert!(params.is_empty());

        let required = ModuleDescriptor::new("tools/lint").with_parameter(
            ParameterSpec::new(
                "config",
                DefaultStrategy::auto_detect("marker-file", &[".eslintrc"]),
            )
            .required(),
        );
        let err = resolver(tmp.path())
            .resolve(&required, &Overrides::new())
            .unwrap_err();
        assert_eq!(err.failure, ParameterFailure::Unresolved);
    }

    #[test]
    fn unknown_detector() {
        let m = ModuleDescriptor::new("tools/lint").with_parameter(ParameterSpec::new(
            "config",
            DefaultStrategy::auto_detect("git-remote", &[]),
        ));
        let err = resolver(Path::new("."))
            .resolve(&m, &Overrides::new())
            .unwrap_err();
        assert_eq!(
            err.failure,
            ParameterFailure::UnknownDetector("git-remote".into())
        );
    }

    #[test]
    fn env_detector_skips_empty_values() {
        let detector = EnvDetector::with_lookup(|name| match name {
            "EMPTY" => Some(String::new()),
            "REGISTRY" => Some("ghcr.io".into()),
            _ => None,
        });
        let args = vec!["MISSING".to_string(), "EMPTY".into(), "REGISTRY".into()];
        assert_eq!(
            detector.detect(Path::new("."), &args),
            Some(json!("ghcr.io"))
        );
    }

    #[test]
    fn closures_are_detectors() {
        let registry = DetectorRegistry::new().with("always", |_: &Path, args: &[String]| {
            args.first().map(|a| json!(a))
        });
        let m = ModuleDescriptor::new("tools/x").with_parameter(ParameterSpec::new(
            "flavour",
            DefaultStrategy::auto_detect("always", &["vanilla"]),
        ));
        let params = ParameterResolver::new(RunMode::Batch, ".")
            .with_detectors(registry)
            .resolve(&m, &Overrides::new())
            .unwrap();
        assert_eq!(params["flavour"], json!("vanilla"));
    }

    #[rstest]
    #[case("strict=true", "strict", json!(true))]
    #[case("depth=3", "depth", json!(3))]
    #[case("path=./src", "path", json!("./src"))]
    #[case("name=", "name", json!(""))]
    #[case("lang/python.installPath=\"app\"", "installPath", json!("app"))]
    fn assignments(#[case] raw: &str, #[case] param: &str, #[case] expected: Value) {
        let mut overrides = Overrides::new();
        overrides.insert_assignment(raw).unwrap();
        assert_eq!(overrides.get("lang/python", param), Some(&expected));
    }

    #[test]
    fn bad_assignments() {
        let mut overrides = Overrides::new();
        assert!(overrides.insert_assignment("novalue").is_err());
        assert!(overrides.insert_assignment("=1").is_err());
    }

    #[test]
    fn extend_layers_values() {
        let mut base = Overrides::new().with("a", 1).with("m/x.b", 2);
        base.extend(Overrides::new().with("a", 10).with("m/x.c", 3));
        assert_eq!(base.get("m/x", "a"), Some(&json!(10)));
        assert_eq!(base.get("m/x", "b"), Some(&json!(2)));
        assert_eq!(base.get("m/x", "c"), Some(&json!(3)));
    }

    #[test]
    fn builtins_are_registered() {
        assert_eq!(
            DetectorRegistry::with_builtins().names(),
            ["bin", "env", "marker-file"]
        );
    }
}
