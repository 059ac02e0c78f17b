//! Baseline hashes: what each module last generated for each target path.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{Result, error::Context};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineFile {
    pub version: u32,
    /// module id → target path → sha256 of the generated content.
    pub baselines: BTreeMap<String, BTreeMap<String, String>>,
}

/// Persistent baseline storage with atomic writes.
pub struct BaselineStore {
    path: PathBuf,
    state: Mutex<BaselineFile>,
}

impl BaselineStore {
    /// Default location under a state dir.
    #[must_use]
    pub fn default_path(state_dir: &Path) -> PathBuf {
        state_dir.join("baselines.json")
    }

    /// Load from disk, starting empty if the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&data)?
        } else {
            BaselineFile {
                version: 1,
                baselines: BTreeMap::new(),
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// In-memory only, for dry runs and tests. `record` does not touch disk.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            state: Mutex::new(BaselineFile::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, module_id: &str, target_path: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .baselines
            .get(module_id)
            .and_then(|targets| targets.get(target_path))
            .cloned()
    }

    /// Remember `hash` as the latest generated content and save. Memory is
    /// only updated once the file is written.
    pub fn record(&self, module_id: &str, target_path: &str, hash: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let current = state
            .baselines
            .get(module_id)
            .and_then(|targets| targets.get(target_path));
        if current.map(String::as_str) == Some(hash) {
            return Ok(());
        }

        let mut next = state.clone();
        next.baselines
            .entry(module_id.to_string())
            .or_default()
            .insert(target_path.to_string(), hash.to_string());
        self.save(&next)?;
        *state = next;
        debug!(module = module_id, target = target_path, "baseline updated");
        Ok(())
    }

    /// Save atomically via temp file + rename.
    fn save(&self, state: &BaselineFile) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
