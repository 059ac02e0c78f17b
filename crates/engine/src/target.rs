//! The target file tree: the only place fragments get written.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use {modsmith_catalog::parse::validate_target_path, tracing::warn};

use crate::{
    baseline::BaselineStore,
    error::InstallError,
    merge::{ConfigFragment, MergeResult, merge},
};

/// Applies fragments somewhere. The orchestrator calls it once per fragment,
/// on the worker running the module.
pub trait Merger: Send + Sync {
    fn apply(&self, fragment: ConfigFragment) -> Result<MergeResult, InstallError>;
}

/// Merges fragments into a directory on disk and keeps baselines current.
pub struct TargetTree {
    root: PathBuf,
    baselines: Arc<BaselineStore>,
}

impl TargetTree {
    pub fn new(root: impl Into<PathBuf>, baselines: Arc<BaselineStore>) -> Self {
        Self {
            root: root.into(),
            baselines,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn baselines(&self) -> &Arc<BaselineStore> {
        &self.baselines
    }

    /// Resolve `target_path` inside the root, refusing anything that could
    /// land outside it.
    fn destination(&self, fragment: &ConfigFragment) -> Result<PathBuf, InstallError> {
        let unsafe_target =
            |reason: String| InstallError::unsafe_target(&fragment.module_id, &fragment.target_path, reason);

        validate_target_path(&fragment.target_path).map_err(unsafe_target)?;
        let relative = Path::new(&fragment.target_path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(unsafe_target("path leaves the target root".into()));
        }

        let dest = self.root.join(relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| InstallError::write(&fragment.module_id, &fragment.target_path, e))?;
            let canonical_root = std::fs::canonicalize(&self.root)
                .map_err(|e| InstallError::write(&fragment.module_id, &fragment.target_path, e))?;
            let canonical_parent = std::fs::canonicalize(parent)
                .map_err(|e| InstallError::write(&fragment.module_id, &fragment.target_path, e))?;
            if !canonical_parent.starts_with(&canonical_root) {
                return Err(unsafe_target("parent directory escapes the target root".into()));
            }
        }
        if let Ok(meta) = std::fs::symlink_metadata(&dest)
            && meta.file_type().is_symlink()
        {
            return Err(unsafe_target("destination is a symlink".into()));
        }
        Ok(dest)
    }

    fn read_current(&self, dest: &Path, fragment: &ConfigFragment) -> Result<Option<String>, InstallError> {
        match std::fs::read_to_string(dest) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(InstallError::write(&fragment.module_id, &fragment.target_path, e)),
        }
    }

    fn remember(&self, fragment: &ConfigFragment) -> Result<(), InstallError> {
        self.baselines
            .record(&fragment.module_id, &fragment.target_path, &fragment.content_hash())
            .map_err(|e| InstallError::Baseline {
                module_id: fragment.module_id.clone(),
                message: e.to_string(),
            })
    }
}

impl Merger for TargetTree {
    fn apply(&self, mut fragment: ConfigFragment) -> Result<MergeResult, InstallError> {
        if fragment.baseline_hash.is_none() {
            fragment.baseline_hash = self.baselines.get(&fragment.module_id, &fragment.target_path);
        }

        let dest = self.destination(&fragment)?;
        let current = self.read_current(&dest, &fragment)?;
        let result = merge(&fragment, current.as_deref());

        match &result {
            MergeResult::AppliedClean => {
                // same bytes already on disk: leave the file (and its mtime) alone
                if current.as_deref() != Some(fragment.content.as_str()) {
                    std::fs::write(&dest, &fragment.content).map_err(|e| {
                        InstallError::write(&fragment.module_id, &fragment.target_path, e)
                    })?;
                }
                self.remember(&fragment)?;
            },
            MergeResult::AppliedNoOp => self.remember(&fragment)?,
            MergeResult::Conflict(conflict) => {
                warn!(
                    module = %conflict.module_id,
                    target = %conflict.target_path,
                    "target modified locally, leaving it untouched"
                );
            },
        }
        Ok(result)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, modsmith_common::sha256_hex};

    fn tree(root: &Path) -> TargetTree {
        TargetTree::new(root, Arc::new(BaselineStore::ephemeral()))
    }

    #[test]
    fn first_write_then_regenerate() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = tree(tmp.path());

        let v1 = ConfigFragment::new("tools/lint", "cfg/ruff.toml", "a = 1\n");
        assert_eq!(tree.apply(v1).unwrap(), MergeResult::AppliedClean);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("cfg/ruff.toml")).unwrap(),
            "a = 1\n"
        );
        assert_eq!(
            tree.baselines().get("tools/lint", "cfg/ruff.toml"),
            Some(sha256_hex("a = 1\n"))
        );

        // untouched since last generation: overwritten
        let v2 = ConfigFragment::new("tools/lint", "cfg/ruff.toml", "a = 2\n");
        assert_eq!(tree.apply(v2).unwrap(), MergeResult::AppliedClean);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("cfg/ruff.toml")).unwrap(),
            "a = 2\n"
        );
    }

    #[test]
    fn local_edit_is_preserved() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = tree(tmp.path());
        tree.apply(ConfigFragment::new("m", "x.cfg", "generated\n"))
            .unwrap();
        std::fs::write(tmp.path().join("x.cfg"), "hand edited\n").unwrap();

        let result = tree
            .apply(ConfigFragment::new("m", "x.cfg", "generated v2\n"))
            .unwrap();
        assert!(result.is_conflict());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("x.cfg")).unwrap(),
            "hand edited\n"
        );
        // baseline still points at the last applied generation
        assert_eq!(tree.baselines().get("m", "x.cfg"), Some(sha256_hex("generated\n")));
    }

    #[test]
    fn rejects_escaping_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = tree(tmp.path());
        for path in ["../outside", "/etc/passwd", "a/../../b"] {
            let err = tree
                .apply(ConfigFragment::new("m", path, "x"))
                .unwrap_err();
            assert!(matches!(err, InstallError::UnsafeTarget { .. }), "{path}: {err}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinked_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("f"), tmp.path().join("link")).unwrap();
        let err = tree(tmp.path())
            .apply(ConfigFragment::new("m", "link", "x"))
            .unwrap_err();
        assert!(matches!(err, InstallError::UnsafeTarget { .. }));
    }
}
