//! Run summary returned by the orchestrator.

use std::fmt::Write as _;

use {
    modsmith_ledger::{LedgerStatus, Parameters},
    serde::{Deserialize, Serialize},
};

use crate::{error::MergeConflict, merge::MergeResult};

/// Merge outcome of one target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub target_path: String,
    /// `applied-clean`, `applied-with-no-op` or `conflict`.
    pub result: String,
}

impl MergeRecord {
    #[must_use]
    pub fn new(target_path: impl Into<String>, result: &MergeResult) -> Self {
        Self {
            target_path: target_path.into(),
            result: result.kind().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module_id: String,
    pub status: LedgerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_parameters: Option<Parameters>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merges: Vec<MergeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed modules upstream that kept this one from starting.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    /// Times the module entered `in_progress` in this run.
    pub attempts: u32,
}

impl ModuleReport {
    #[must_use]
    pub fn new(module_id: impl Into<String>, status: LedgerStatus) -> Self {
        Self {
            module_id: module_id.into(),
            status,
            resolved_parameters: None,
            merges: Vec::new(),
            error: None,
            blocked_by: Vec::new(),
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// Install order of the selected modules.
    pub order: Vec<String>,
    /// One entry per selected module, in install order.
    pub modules: Vec<ModuleReport>,
    pub conflicts: Vec<MergeConflict>,
    pub cancelled: bool,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
}

impl RunReport {
    #[must_use]
    pub fn module(&self, module_id: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    #[must_use]
    pub fn status(&self, module_id: &str) -> Option<LedgerStatus> {
        self.module(module_id).map(|m| m.status)
    }

    #[must_use]
    pub fn count(&self, status: LedgerStatus) -> usize {
        self.modules.iter().filter(|m| m.status == status).count()
    }

    /// Every module satisfied and nothing conflicted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.conflicts.is_empty() && self.modules.iter().all(|m| m.status.is_satisfied())
    }

    /// Exit code for the CLI.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "run {}", self.run_id);
        for m in &self.modules {
            let _ = write!(out, "  {:<12} {}", m.status.to_string(), m.module_id);
            if !m.blocked_by.is_empty() {
                let _ = write!(out, "  (blocked by {})", m.blocked_by.join(", "));
            }
            if let Some(err) = &m.error {
                let _ = write!(out, "  {err}");
            }
            out.push('\n');
            for merge in &m.merges {
                let _ = writeln!(out, "      {} {}", merge.result, merge.target_path);
            }
        }
        for c in &self.conflicts {
            let _ = writeln!(
                out,
                "conflict: {} ({}): local edits kept, proposed content not written",
                c.target_path, c.module_id
            );
        }
        let _ = write!(
            out,
            "{} complete, {} skipped, {} failed, {} pending, {} conflicts",
            self.count(LedgerStatus::Complete),
            self.count(LedgerStatus::Skipped),
            self.count(LedgerStatus::Failed),
            self.count(LedgerStatus::Pending) + self.count(LedgerStatus::InProgress),
            self.conflicts.len()
        );
        if self.cancelled {
            out.push_str(" (cancelled)");
        }
        out.push('\n');
        out
    }
}
