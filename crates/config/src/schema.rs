/// Config schema types (engine, ledger, target, overrides).
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModsmithConfig {
    pub engine: EngineConfig,
    pub catalog: CatalogConfig,
    pub ledger: LedgerConfig,
    pub target: TargetConfig,
    /// Parameter overrides. `param = value` applies to every module that
    /// declares `param`; `"module/id.param" = value` applies to one module.
    pub overrides: BTreeMap<String, serde_json::Value>,
}

impl ModsmithConfig {
    /// Directory holding the ledger and baseline files.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.target.state_dir()
    }

    /// Resolved ledger location: `ledger.path` if set, otherwise a default
    /// under the state dir that depends on the backend.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        match &self.ledger.path {
            Some(path) => path.clone(),
            None => match self.ledger.backend {
                LedgerBackend::Sqlite => self.state_dir().join("ledger.db"),
                LedgerBackend::File | LedgerBackend::Memory => self.state_dir().join("ledger"),
            },
        }
    }
}

/// How parameters with a `prompt-user` default are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Never prompt. A required parameter with no value fails its module.
    #[default]
    Batch,
    Interactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of installers running at once. Defaults to 4.
    pub workers: usize,
    pub mode: RunMode,
    /// Pull `experimental` modules into full-catalog runs.
    pub include_experimental: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            mode: RunMode::Batch,
            include_experimental: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog file used when the CLI is not given one.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// JSON lines, one file per run.
    #[default]
    File,
    Sqlite,
    /// Nothing survives the process. Useful for dry runs.
    Memory,
}

impl std::fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Directory (file backend) or database file (sqlite backend).
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Root directory that module targets are written under.
    pub root: PathBuf,
    /// Defaults to `<root>/.modsmith`.
    pub state_dir: Option<PathBuf>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            state_dir: None,
        }
    }
}

impl TargetConfig {
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| default_state_dir(&self.root))
    }
}

#[must_use]
pub fn default_state_dir(root: &Path) -> PathBuf {
    root.join(".modsmith")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ModsmithConfig::default();
        assert_eq!(cfg.engine.workers, 4);
        assert_eq!(cfg.engine.mode, RunMode::Batch);
        assert_eq!(cfg.ledger.backend, LedgerBackend::File);
        assert_eq!(cfg.state_dir(), PathBuf::from("./.modsmith"));
        assert_eq!(cfg.ledger_path(), PathBuf::from("./.modsmith/ledger"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: ModsmithConfig = toml::from_str(
            r#"
            [engine]
            mode = "interactive"

            [ledger]
            backend = "sqlite"

            [target]
            root = "/srv/app"

            [overrides]
            installPath = "/opt/tools"
            "tools/lint.strict" = true
            "#,
        )
        .unwrap_or_default();
        assert_eq!(cfg.engine.workers, 4);
        assert_eq!(cfg.engine.mode, RunMode::Interactive);
        assert_eq!(cfg.ledger_path(), PathBuf::from("/srv/app/.modsmith/ledger.db"));
        assert_eq!(
            cfg.overrides.get("tools/lint.strict"),
            Some(&serde_json::Value::Bool(true))
        );
    }
}
