use std::collections::BTreeMap;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Resolved parameter values, sorted by name.
pub type Parameters = BTreeMap<String, Value>;

/// Per-module installation status within a run.
///
/// Declared in lifecycle order. A module never moves back to an earlier
/// status within the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Skipped,
}

impl LedgerStatus {
    /// Allowed moves: `pending → {in_progress, skipped, failed}` and
    /// `in_progress → {complete, failed}`.
    ///
    /// `pending → failed` covers failures found before the module started,
    /// such as an unresolvable parameter.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Skipped | Self::Failed)
                | (Self::InProgress, Self::Complete | Self::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Skipped)
    }

    /// Dependents may start once a dependency is in one of these.
    #[must_use]
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One appended ledger line. Records are never rewritten or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub run_id: String,
    pub module_id: String,
    /// Position within the run, strictly increasing.
    pub seq: u64,
    pub status: LedgerStatus,
    pub at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What the module produced, opaque to the ledger. Only outcome records
    /// carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

/// Current state of one module in a run, compacted from its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_id: String,
    pub module_id: String,
    pub status: LedgerStatus,
    /// Snapshot of the parameters the module was (or would have been)
    /// installed with.
    pub resolved_parameters: Option<Parameters>,
    pub parameters_digest: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    pub updated_at_ms: u64,
    /// Number of times the module entered `in_progress`. Above one means an
    /// interrupted attempt was resumed.
    pub attempts: u32,
}

impl LedgerEntry {
    #[must_use]
    pub fn pending(run_id: impl Into<String>, module_id: impl Into<String>, at_ms: u64) -> Self {
        Self {
            run_id: run_id.into(),
            module_id: module_id.into(),
            status: LedgerStatus::Pending,
            resolved_parameters: None,
            parameters_digest: None,
            error: None,
            outcome: None,
            updated_at_ms: at_ms,
            attempts: 0,
        }
    }

    /// Fold one record into the compacted view.
    pub fn apply(&mut self, record: &LedgerRecord) {
        self.status = record.status;
        self.updated_at_ms = record.at_ms;
        if record.status == LedgerStatus::InProgress {
            self.attempts += 1;
        }
        if record.parameters.is_some() {
            self.resolved_parameters = record.parameters.clone();
        }
        if record.parameters_digest.is_some() {
            self.parameters_digest = record.parameters_digest.clone();
        }
        if record.error.is_some() {
            self.error = record.error.clone();
        }
        if record.outcome.is_some() {
            self.outcome = record.outcome.clone();
        }
    }
}
