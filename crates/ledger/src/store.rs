//! Persistence trait for ledger records.

use async_trait::async_trait;

use crate::{Result, types::LedgerRecord};

/// Durable, append-only backend for ledger records keyed by `(run_id, module_id)`.
///
/// Implementations must survive process restarts (except the in-memory
/// store) and must never rewrite an appended record.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, record: &LedgerRecord) -> Result<()>;
    /// Every record of a run, ordered by `seq`.
    async fn load_run(&self, run_id: &str) -> Result<Vec<LedgerRecord>>;
    /// Every record of a module across all runs, oldest first.
    async fn module_history(&self, module_id: &str) -> Result<Vec<LedgerRecord>>;
    /// Known run ids, sorted.
    async fn list_runs(&self) -> Result<Vec<String>>;
}

/// Oldest-first ordering used for cross-run history.
pub(crate) fn sort_history(records: &mut [LedgerRecord]) {
    records.sort_by(|a, b| {
        a.at_ms
            .cmp(&b.at_ms)
            .then_with(|| a.run_id.cmp(&b.run_id))
            .then_with(|| a.seq.cmp(&b.seq))
    });
}
