//! Three-way merge of generated fragments against the target tree.
//!
//! The three inputs are the hash of what the module generated last time
//! (the baseline), the file currently on disk, and the new fragment. A file
//! the operator edited since the last generation is never overwritten.

use {
    modsmith_common::sha256_hex,
    serde::{Deserialize, Serialize},
};

use crate::error::MergeConflict;

/// Content a module wants written to one target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFragment {
    pub module_id: String,
    /// Relative to the target root, `/`-separated.
    pub target_path: String,
    pub content: String,
    /// Hash of the content this module generated for this path last time,
    /// absent on first generation. Filled from the baseline store when the
    /// installer leaves it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_hash: Option<String>,
}

impl ConfigFragment {
    #[must_use]
    pub fn new(
        module_id: impl Into<String>,
        target_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            target_path: target_path.into(),
            content: content.into(),
            baseline_hash: None,
        }
    }

    #[must_use]
    pub fn with_baseline(mut self, hash: impl Into<String>) -> Self {
        self.baseline_hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.content)
    }
}

/// Outcome of merging one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum MergeResult {
    /// The fragment is (to be) written as-is.
    AppliedClean,
    /// The file already holds exactly the fragment.
    AppliedNoOp,
    /// The file diverged from the baseline and from the fragment. Left alone.
    Conflict(MergeConflict),
}

impl MergeResult {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AppliedClean => "applied-clean",
            Self::AppliedNoOp => "applied-with-no-op",
            Self::Conflict(_) => "conflict",
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Decide what to do with `fragment` given the file's current content.
///
/// Pure: writing the file is the caller's job.
#[must_use]
pub fn merge(fragment: &ConfigFragment, current: Option<&str>) -> MergeResult {
    let Some(current) = current else {
        return MergeResult::AppliedClean;
    };

    let current_hash = sha256_hex(current);
    if fragment.baseline_hash.as_deref() == Some(current_hash.as_str()) {
        return MergeResult::AppliedClean;
    }
    if current == fragment.content {
        return MergeResult::AppliedNoOp;
    }

    MergeResult::Conflict(MergeConflict {
        module_id: fragment.module_id.clone(),
        target_path: fragment.target_path.clone(),
        baseline_hash: fragment.baseline_hash.clone(),
        current_hash,
        existing: current.to_string(),
        proposed: fragment.content.clone(),
    })
}
