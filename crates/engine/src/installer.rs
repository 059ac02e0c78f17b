//! Module installers: the per-module work the orchestrator dispatches.

use std::path::PathBuf;

use {
    modsmith_catalog::ModuleDescriptor,
    modsmith_config::env_subst::substitute_env_with,
    modsmith_ledger::Parameters,
    serde_json::Value,
    tokio_util::sync::CancellationToken,
};

use crate::{error::InstallError, merge::ConfigFragment};

/// What an installer knows about the run it is part of.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub run_id: String,
    pub target_root: PathBuf,
    /// Cancelled when the run is asked to stop. Long installers and nested
    /// runs should hand it on.
    pub cancel: CancellationToken,
}

/// Performs one module's installation and returns the fragments it wants
/// merged into the target tree.
///
/// Runs on a blocking worker, so it may do blocking I/O or spawn processes.
/// A nested orchestration can be driven from here with
/// `tokio::runtime::Handle::current().block_on(..)`.
pub trait Installer: Send + Sync {
    fn install(
        &self,
        ctx: &InstallContext,
        module: &ModuleDescriptor,
        params: &Parameters,
    ) -> Result<Vec<ConfigFragment>, InstallError>;
}

impl<F> Installer for F
where
    F: Fn(&InstallContext, &ModuleDescriptor, &Parameters) -> Result<Vec<ConfigFragment>, InstallError>
        + Send
        + Sync,
{
    fn install(
        &self,
        ctx: &InstallContext,
        module: &ModuleDescriptor,
        params: &Parameters,
    ) -> Result<Vec<ConfigFragment>, InstallError> {
        self(ctx, module, params)
    }
}

/// Renders each declared target that names a template, replacing
/// `${param}` with the resolved parameter value.
///
/// Targets without a template produce nothing. Placeholders that match no
/// parameter are left in place.
pub struct TemplateInstaller {
    base_dir: PathBuf,
}

impl TemplateInstaller {
    /// `base_dir` is where template paths are resolved, normally the
    /// catalog file's directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn render(template: &str, params: &Parameters) -> String {
        substitute_env_with(template, |name| params.get(name).map(value_text))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Installer for TemplateInstaller {
    fn install(
        &self,
        _ctx: &InstallContext,
        module: &ModuleDescriptor,
        params: &Parameters,
    ) -> Result<Vec<ConfigFragment>, InstallError> {
        let mut fragments = Vec::new();
        for target in &module.targets {
            let Some(template) = &target.template else {
                continue;
            };
            let path = self.base_dir.join(template);
            let raw = std::fs::read_to_string(&path).map_err(|source| InstallError::Template {
                module_id: module.id.clone(),
                path: path.clone(),
                source,
            })?;
            fragments.push(ConfigFragment::new(
                &module.id,
                &target.path,
                Self::render(&raw, params),
            ));
        }
        Ok(fragments)
    }
}
