//! In-memory store for testing.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    Result,
    store::{LedgerStore, sort_history},
    types::LedgerRecord,
};

/// In-memory store backed by a `Vec`. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<LedgerRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn append(&self, record: &LedgerRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Vec<LedgerRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut run: Vec<LedgerRecord> = records
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();
        run.sort_by_key(|r| r.seq);
        Ok(run)
    }

    async fn module_history(&self, module_id: &str) -> Result<Vec<LedgerRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut history: Vec<LedgerRecord> = records
            .iter()
            .filter(|r| r.module_id == module_id)
            .cloned()
            .collect();
        sort_history(&mut history);
        Ok(history)
    }

    async fn list_runs(&self) -> Result<Vec<String>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut runs: Vec<String> = records.iter().map(|r| r.run_id.clone()).collect();
        runs.sort();
        runs.dedup();
        Ok(runs)
    }
}
