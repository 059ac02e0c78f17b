//! Descriptor store: loads a catalog and validates it in a single pass.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    Result,
    error::{ValidationError, Violation, ViolationKind},
    graph::shared_target_violations,
    parse::{read_catalog, validate_module_id, validate_parameter_name, validate_target_path},
    types::{DefaultStrategy, ModuleDescriptor, TargetDecl},
};

/// Where descriptors come from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// A `.toml`, `.yaml`/`.yml` or `.json` catalog file. Templates resolve
    /// relative to its directory.
    File(PathBuf),
    /// Descriptors built in memory, e.g. by a module that orchestrates a
    /// sub-catalog of its own.
    Inline {
        modules: Vec<ModuleDescriptor>,
        base_dir: PathBuf,
    },
}

impl From<PathBuf> for CatalogSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<Vec<ModuleDescriptor>> for CatalogSource {
    fn from(modules: Vec<ModuleDescriptor>) -> Self {
        Self::Inline {
            modules,
            base_dir: PathBuf::from("."),
        }
    }
}

/// A validated, ordered set of descriptors.
#[derive(Debug, Clone)]
pub struct Catalog {
    modules: Vec<ModuleDescriptor>,
    index: HashMap<String, usize>,
    base_dir: PathBuf,
}

impl Catalog {
    fn new(modules: Vec<ModuleDescriptor>, base_dir: PathBuf) -> Self {
        let index = modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();
        Self {
            modules,
            index,
            base_dir,
        }
    }

    /// Descriptors in declaration order.
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Directory templates are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute-or-relative path of a target's template, if it has one.
    pub fn template_path(&self, target: &TargetDecl) -> Option<PathBuf> {
        target.template.as_ref().map(|t| self.base_dir.join(t))
    }
}

/// Loads catalogs and reports every violation at once.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    known_detectors: Option<BTreeSet<String>>,
}

impl DescriptorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reject auto-detect parameters naming a detector outside `names`.
    #[must_use]
    pub fn with_detectors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_detectors = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Load and validate a catalog.
    pub fn load(&self, source: impl Into<CatalogSource>) -> Result<Catalog> {
        let (modules, base_dir) = match source.into() {
            CatalogSource::File(path) => {
                let modules = read_catalog(&path)?;
                let base_dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                (modules, base_dir)
            },
            CatalogSource::Inline { modules, base_dir } => (modules, base_dir),
        };

        let violations = self.validate(&modules);
        if !violations.is_empty() {
            return Err(ValidationError { violations }.into());
        }

        debug!(count = modules.len(), base_dir = %base_dir.display(), "loaded catalog");
        Ok(Catalog::new(modules, base_dir))
    }

    /// Collect every violation in `modules`: per-module checks in
    /// declaration order, then target paths shared by unrelated modules.
    pub fn validate(&self, modules: &[ModuleDescriptor]) -> Vec<Violation> {
        let mut violations = Vec::new();
        let known: HashSet<&str> = modules.iter().map(|m| m.id.as_str()).collect();
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for module in modules {
            let id = module.id.as_str();

            if !validate_module_id(id) {
                violations.push(Violation::new(
                    ViolationKind::InvalidId,
                    id,
                    "id must be 1-128 chars of lowercase alphanumeric, '-', '_' segments joined by '/'",
                ));
            }
            if !seen_ids.insert(id) {
                violations.push(Violation::new(
                    ViolationKind::DuplicateId,
                    id,
                    "id is declared more than once",
                ));
            }

            let mut seen_deps = HashSet::new();
            for dep in &module.depends_on {
                if dep == id {
                    violations.push(Violation::new(
                        ViolationKind::SelfDependency,
                        id,
                        "module depends on itself",
                    ));
                } else if !known.contains(dep.as_str()) {
                    violations.push(Violation::new(
                        ViolationKind::UnknownDependency,
                        id,
                        format!("depends on unknown module '{dep}'"),
                    ));
                }
                if !seen_deps.insert(dep.as_str()) {
                    violations.push(Violation::new(
                        ViolationKind::DuplicateDependency,
                        id,
                        format!("dependency '{dep}' is listed twice"),
                    ));
                }
            }

            self.validate_parameters(module, &mut violations);
            validate_targets(module, &mut violations);
        }

        violations.extend(shared_target_violations(modules));
        violations
    }

    fn validate_parameters(&self, module: &ModuleDescriptor, violations: &mut Vec<Violation>) {
        let id = module.id.as_str();
        let mut seen = HashSet::new();

        for spec in &module.parameters {
            if !validate_parameter_name(&spec.name) {
                violations.push(Violation::new(
                    ViolationKind::InvalidParameter,
                    id,
                    format!("invalid parameter name '{}'", spec.name),
                ));
            }
            if !seen.insert(spec.name.as_str()) {
                violations.push(Violation::new(
                    ViolationKind::DuplicateParameter,
                    id,
                    format!("parameter '{}' is declared more than once", spec.name),
                ));
            }

            match &spec.default {
                DefaultStrategy::Literal { value } if value.is_null() => {
                    violations.push(Violation::new(
                        ViolationKind::InvalidParameter,
                        id,
                        format!("parameter '{}' has a literal default with no value", spec.name),
                    ));
                },
                DefaultStrategy::AutoDetect { detector, .. } if detector.trim().is_empty() => {
                    violations.push(Violation::new(
                        ViolationKind::InvalidParameter,
                        id,
                        format!("parameter '{}' is auto-detected but names no detector", spec.name),
                    ));
                },
                DefaultStrategy::AutoDetect { detector, .. } => {
                    if let Some(ref known) = self.known_detectors
                        && !known.contains(detector)
                    {
                        violations.push(Violation::new(
                            ViolationKind::InvalidParameter,
                            id,
                            format!(
                                "parameter '{}' uses unknown detector '{detector}'",
                                spec.name
                            ),
                        ));
                    }
                },
                DefaultStrategy::Literal { .. } | DefaultStrategy::PromptUser { .. } => {},
            }
        }
    }
}

fn validate_targets(module: &ModuleDescriptor, violations: &mut Vec<Violation>) {
    let id = module.id.as_str();
    let mut seen = HashSet::new();

    for target in &module.targets {
        if let Err(reason) = validate_target_path(&target.path) {
            violations.push(Violation::new(ViolationKind::InvalidTarget, id, reason));
        }
        if let Some(ref template) = target.template
            && let Err(reason) = validate_target_path(template)
        {
            violations.push(Violation::new(
                ViolationKind::InvalidTarget,
                id,
                format!("template: {reason}"),
            ));
        }
        if !seen.insert(target.path.as_str()) {
            violations.push(Violation::new(
                ViolationKind::DuplicateTarget,
                id,
                format!("target '{}' is declared more than once", target.path),
            ));
        }
    }
}
