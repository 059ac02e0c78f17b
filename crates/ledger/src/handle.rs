//! Run-scoped view over a ledger store.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    modsmith_common::now_ms,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    store::LedgerStore,
    types::{LedgerEntry, LedgerRecord, LedgerStatus, Parameters},
};

/// Run ids double as file names, so keep them to a safe alphabet.
pub fn validate_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= 128
        && !run_id.starts_with('.')
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Timestamp for a new record: wall-clock time, but strictly later than any
/// record this process stamped before and never earlier than `floor`.
///
/// Cross-run history is ordered by this value, so two outcomes recorded in
/// the same millisecond, or after the clock stepped back, still sort in the
/// order they happened.
fn record_time(floor: u64) -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let mut stamped = 0;
    let _ = LAST.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        stamped = now_ms().max(last + 1).max(floor);
        Some(stamped)
    });
    stamped
}

/// Entry point: opens run handles over a shared store.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Open a run. Records already stored under `run_id` are replayed, so
    /// reopening an interrupted run continues from its last known state.
    pub async fn begin(&self, run_id: &str) -> Result<LedgerHandle> {
        if !validate_run_id(run_id) {
            return Err(Error::InvalidRunId {
                run_id: run_id.to_string(),
            });
        }

        let records = self.store.load_run(run_id).await?;
        let mut order = Vec::new();
        let mut replayed: HashMap<String, LedgerEntry> = HashMap::new();
        let mut last_seq = 0;
        for record in &records {
            last_seq = last_seq.max(record.seq);
            replayed
                .entry(record.module_id.clone())
                .or_insert_with(|| {
                    order.push(record.module_id.clone());
                    LedgerEntry::pending(run_id, &record.module_id, record.at_ms)
                })
                .apply(record);
        }
        let entries = Entries {
            map: replayed
                .into_iter()
                .map(|(id, entry)| (id, Arc::new(Mutex::new(entry))))
                .collect(),
            order,
        };

        if records.is_empty() {
            debug!(run_id, "opened new run");
        } else {
            info!(
                run_id,
                records = records.len(),
                modules = entries.order.len(),
                "reopened existing run"
            );
        }

        Ok(LedgerHandle {
            run_id: run_id.to_string(),
            store: Arc::clone(&self.store),
            entries: RwLock::new(entries),
            seq: AtomicU64::new(last_seq),
        })
    }
}

#[derive(Default)]
struct Entries {
    /// Registration order.
    order: Vec<String>,
    map: HashMap<String, Arc<Mutex<LedgerEntry>>>,
}

/// Extra data recorded alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionDetails {
    pub parameters: Option<Parameters>,
    pub parameters_digest: Option<String>,
    pub error: Option<String>,
    pub outcome: Option<serde_json::Value>,
}

/// One open run.
///
/// Each module entry sits behind its own async lock, so transitions of a
/// single module are strictly ordered while different modules proceed in
/// parallel.
pub struct LedgerHandle {
    run_id: String,
    store: Arc<dyn LedgerStore>,
    entries: RwLock<Entries>,
    seq: AtomicU64,
}

impl LedgerHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn slot(&self, module_id: &str) -> Option<Arc<Mutex<LedgerEntry>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.map.get(module_id).cloned()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Create `pending` entries for modules not yet part of this run.
    ///
    /// Modules already known from a previous attempt keep their state.
    pub async fn register(&self, module_ids: &[String]) -> Result<()> {
        for module_id in module_ids {
            let slot = {
                let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
                if entries.map.contains_key(module_id) {
                    continue;
                }
                let slot = Arc::new(Mutex::new(LedgerEntry::pending(
                    &self.run_id,
                    module_id,
                    record_time(0),
                )));
                entries.order.push(module_id.clone());
                entries.map.insert(module_id.clone(), Arc::clone(&slot));
                slot
            };

            let entry = slot.lock().await;
            self.store
                .append(&LedgerRecord {
                    run_id: self.run_id.clone(),
                    module_id: module_id.clone(),
                    seq: self.next_seq(),
                    status: LedgerStatus::Pending,
                    at_ms: entry.updated_at_ms,
                    parameters: None,
                    parameters_digest: None,
                    error: None,
                    outcome: None,
                })
                .await?;
        }
        Ok(())
    }

    /// Current state of one module.
    pub async fn entry(&self, module_id: &str) -> Option<LedgerEntry> {
        let slot = self.slot(module_id)?;
        let entry = slot.lock().await;
        Some(entry.clone())
    }

    /// Current status of one module, `None` if it is not part of this run.
    pub async fn status(&self, module_id: &str) -> Option<LedgerStatus> {
        self.entry(module_id).await.map(|e| e.status)
    }

    /// Move a module to `next` with no extra details.
    pub async fn transition(&self, module_id: &str, next: LedgerStatus) -> Result<LedgerEntry> {
        self.transition_with(module_id, next, TransitionDetails::default())
            .await
    }

    /// Move a module to `next`, appending the record before updating the
    /// in-memory view. Rejects any move the state machine does not allow.
    pub async fn transition_with(
        &self,
        module_id: &str,
        next: LedgerStatus,
        details: TransitionDetails,
    ) -> Result<LedgerEntry> {
        let slot = self
            .slot(module_id)
            .ok_or_else(|| Error::unknown_module(module_id))?;
        let mut entry = slot.lock().await;

        if !entry.status.can_transition_to(next) {
            return Err(Error::invalid_transition(module_id, entry.status, next));
        }
        self.append_locked(&mut entry, next, details).await?;
        Ok(entry.clone())
    }

    /// Put a module `in_progress` after checking every dependency is
    /// satisfied (`complete` or `skipped`) in this run.
    ///
    /// A module already `in_progress` was interrupted before its outcome was
    /// recorded; starting it again records a new attempt.
    pub async fn start(
        &self,
        module_id: &str,
        dependencies: &[&str],
        parameters: Parameters,
        parameters_digest: String,
    ) -> Result<LedgerEntry> {
        // Dependencies only move forward, so a satisfied one stays satisfied.
        for dep in dependencies {
            let status = self.status(dep).await;
            if !status.is_some_and(LedgerStatus::is_satisfied) {
                return Err(Error::DependencyNotSatisfied {
                    module_id: module_id.to_string(),
                    dependency: (*dep).to_string(),
                    status: status.map_or_else(|| "not registered".to_string(), |s| s.to_string()),
                });
            }
        }

        let slot = self
            .slot(module_id)
            .ok_or_else(|| Error::unknown_module(module_id))?;
        let mut entry = slot.lock().await;

        match entry.status {
            LedgerStatus::Pending => {},
            LedgerStatus::InProgress => {
                warn!(
                    run_id = %self.run_id,
                    module = module_id,
                    attempt = entry.attempts + 1,
                    "resuming interrupted module"
                );
            },
            other => {
                return Err(Error::invalid_transition(
                    module_id,
                    other,
                    LedgerStatus::InProgress,
                ));
            },
        }

        self.append_locked(&mut entry, LedgerStatus::InProgress, TransitionDetails {
            parameters: Some(parameters),
            parameters_digest: Some(parameters_digest),
            ..TransitionDetails::default()
        })
        .await?;
        Ok(entry.clone())
    }

    async fn append_locked(
        &self,
        entry: &mut LedgerEntry,
        next: LedgerStatus,
        details: TransitionDetails,
    ) -> Result<()> {
        let record = LedgerRecord {
            run_id: self.run_id.clone(),
            module_id: entry.module_id.clone(),
            seq: self.next_seq(),
            status: next,
            at_ms: record_time(entry.updated_at_ms + 1),
            parameters: details.parameters,
            // Outcomes carry the digest they were reached with.
            parameters_digest: details
                .parameters_digest
                .or_else(|| entry.parameters_digest.clone()),
            error: details.error,
            outcome: details.outcome,
        };
        self.store.append(&record).await?;
        entry.apply(&record);
        debug!(run_id = %self.run_id, module = %entry.module_id, status = %next, "ledger transition");
        Ok(())
    }

    /// Compacted current state of every module, in registration order.
    pub async fn snapshot(&self) -> Vec<LedgerEntry> {
        let slots: Vec<Arc<Mutex<LedgerEntry>>> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .order
                .iter()
                .filter_map(|id| entries.map.get(id).cloned())
                .collect()
        };
        let mut snapshot = Vec::with_capacity(slots.len());
        for slot in slots {
            snapshot.push(slot.lock().await.clone());
        }
        snapshot
    }

    /// First module, in registration order, that still has work to do.
    pub async fn resume_point(&self) -> Option<String> {
        self.snapshot()
            .await
            .into_iter()
            .find(|e| !e.status.is_satisfied())
            .map(|e| e.module_id)
    }

    /// The latest outcome of `module_id` in another run, if that outcome was
    /// a success with the same parameter digest.
    ///
    /// A later failure in another run hides an earlier success.
    pub async fn prior_satisfied(
        &self,
        module_id: &str,
        parameters_digest: &str,
    ) -> Result<Option<LedgerRecord>> {
        let history = self.store.module_history(module_id).await?;
        let latest = history
            .into_iter()
            .rev()
            .find(|r| r.run_id != self.run_id && r.status.is_terminal());

        Ok(latest.filter(|r| {
            r.status.is_satisfied() && r.parameters_digest.as_deref() == Some(parameters_digest)
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{store_file::FileStore, store_memory::InMemoryStore},
        serde_json::Value,
    };

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn params(path: &str) -> Parameters {
        let mut p = Parameters::new();
        p.insert("installPath".into(), Value::from(path));
        p
    }

    async fn open(run_id: &str) -> (Ledger, LedgerHandle) {
        let ledger = Ledger::new(Arc::new(InMemoryStore::new()));
        let handle = ledger.begin(run_id).await.unwrap();
        (ledger, handle)
    }

    #[tokio::test]
    async fn register_creates_pending_entries() {
        let (_, handle) = open("r1").await;
        handle.register(&ids(&["a", "b"])).await.unwrap();

        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|e| e.status == LedgerStatus::Pending));
        assert_eq!(handle.resume_point().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn rejects_backward_transition() {
        let (_, handle) = open("r1").await;
        handle.register(&ids(&["a"])).await.unwrap();
        handle
            .start("a", &[], params("."), "d".into())
            .await
            .unwrap();
        handle
            .transition("a", LedgerStatus::Complete)
            .await
            .unwrap();

        let err = handle
            .transition("a", LedgerStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        let err = handle
            .start("a", &[], params("."), "d".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn start_requires_complete_dependencies() {
        let (_, handle) = open("r1").await;
        handle.register(&ids(&["a", "b"])).await.unwrap();

        let err = handle
            .start("b", &["a"], params("."), "d".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DependencyNotSatisfied { .. }));
        assert_eq!(handle.status("b").await, Some(LedgerStatus::Pending));

        handle
            .transition("a", LedgerStatus::Skipped)
            .await
            .unwrap();
        handle
            .start("b", &["a"], params("."), "d".into())
            .await
            .unwrap();
        assert_eq!(handle.status("b").await, Some(LedgerStatus::InProgress));
    }

    #[tokio::test]
    async fn unknown_module_is_an_error() {
        let (_, handle) = open("r1").await;
        let err = handle
            .transition("ghost", LedgerStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModule { .. }));
    }

    #[tokio::test]
    async fn reopening_a_run_replays_its_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store: Arc<dyn LedgerStore> = Arc::new(FileStore::new(tmp.path()));
        let ledger = Ledger::new(Arc::clone(&store));

        {
            let handle = ledger.begin("r1").await.unwrap();
            handle.register(&ids(&["a", "b", "c"])).await.unwrap();
            handle
                .start("a", &[], params("."), "d".into())
                .await
                .unwrap();
            handle
                .transition("a", LedgerStatus::Complete)
                .await
                .unwrap();
            handle
                .start("b", &["a"], params("."), "d".into())
                .await
                .unwrap();
            // process dies here with b in progress
        }

        let handle = ledger.begin("r1").await.unwrap();
        assert_eq!(handle.status("a").await, Some(LedgerStatus::Complete));
        assert_eq!(handle.status("b").await, Some(LedgerStatus::InProgress));
        assert_eq!(handle.status("c").await, Some(LedgerStatus::Pending));
        assert_eq!(handle.resume_point().await.as_deref(), Some("b"));

        // registering again does not reset anything
        handle.register(&ids(&["a", "b", "c"])).await.unwrap();
        assert_eq!(handle.status("a").await, Some(LedgerStatus::Complete));

        let entry = handle
            .start("b", &["a"], params("."), "d".into())
            .await
            .unwrap();
        assert_eq!(entry.attempts, 2);
        let entry = handle
            .transition("b", LedgerStatus::Complete)
            .await
            .unwrap();
        assert_eq!(entry.resolved_parameters, Some(params(".")));

        let records = store.load_run("r1").await.unwrap();
        assert!(
            records.windows(2).all(|w| w[0].seq < w[1].seq),
            "seq must keep increasing across reopen"
        );
    }

    #[tokio::test]
    async fn prior_satisfied_matches_digest_from_other_runs() {
        let ledger = Ledger::new(Arc::new(InMemoryStore::new()));

        let first = ledger.begin("r1").await.unwrap();
        first.register(&ids(&["a"])).await.unwrap();
        first
            .start("a", &[], params("."), "digest-1".into())
            .await
            .unwrap();
        let done = first
            .transition("a", LedgerStatus::Complete)
            .await
            .unwrap();
        assert_eq!(done.parameters_digest.as_deref(), Some("digest-1"));

        let second = ledger.begin("r2").await.unwrap();
        second.register(&ids(&["a"])).await.unwrap();
        assert!(second.prior_satisfied("a", "digest-1").await.unwrap().is_some());
        assert!(second.prior_satisfied("a", "digest-2").await.unwrap().is_none());
        // own run never counts
        assert!(first.prior_satisfied("a", "digest-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn later_failure_hides_earlier_success() {
        let ledger = Ledger::new(Arc::new(InMemoryStore::new()));
        for (run, outcome) in [("r1", LedgerStatus::Complete), ("r2", LedgerStatus::Failed)] {
            let handle = ledger.begin(run).await.unwrap();
            handle.register(&ids(&["a"])).await.unwrap();
            handle
                .start("a", &[], params("."), "d".into())
                .await
                .unwrap();
            handle.transition("a", outcome).await.unwrap();
        }

        let third = ledger.begin("r3").await.unwrap();
        assert!(third.prior_satisfied("a", "d").await.unwrap().is_none());
    }

    #[test]
    fn record_times_strictly_increase() {
        let stamps: Vec<u64> = (0..1000).map(|_| record_time(0)).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        let far = now_ms() + 60_000;
        assert!(record_time(far) >= far);
        assert!(record_time(0) > far);
    }

    #[tokio::test]
    async fn resumed_records_sort_after_earlier_ones() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryStore::new());
        let ledger = Ledger::new(Arc::clone(&store));
        // a record stamped ahead of this clock, as after the clock stepped back
        let ahead = now_ms() + 60_000;
        store
            .append(&LedgerRecord {
                run_id: "r1".into(),
                module_id: "a".into(),
                seq: 1,
                status: LedgerStatus::Pending,
                at_ms: ahead,
                parameters: None,
                parameters_digest: None,
                error: None,
                outcome: None,
            })
            .await
            .unwrap();

        let handle = ledger.begin("r1").await.unwrap();
        handle
            .start("a", &[], params("."), "d".into())
            .await
            .unwrap();
        let history = store.module_history("a").await.unwrap();
        let statuses: Vec<LedgerStatus> = history.iter().map(|r| r.status).collect();
        assert_eq!(statuses, [LedgerStatus::Pending, LedgerStatus::InProgress]);
        assert!(history[1].at_ms > ahead);
    }

    #[tokio::test]
    async fn outcome_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(Arc::new(FileStore::new(tmp.path())));
        {
            let handle = ledger.begin("r1").await.unwrap();
            handle.register(&ids(&["a"])).await.unwrap();
            handle
                .start("a", &[], params("."), "d".into())
                .await
                .unwrap();
            handle
                .transition_with("a", LedgerStatus::Complete, TransitionDetails {
                    outcome: Some(serde_json::json!({"merges": [{"target_path": "x", "result": "conflict"}]})),
                    ..TransitionDetails::default()
                })
                .await
                .unwrap();
        }

        let entry = ledger.begin("r1").await.unwrap().entry("a").await.unwrap();
        assert_eq!(entry.status, LedgerStatus::Complete);
        assert_eq!(
            entry.outcome.unwrap()["merges"][0]["result"],
            Value::from("conflict")
        );
        assert_eq!(entry.parameters_digest.as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn invalid_run_id_is_rejected() {
        let ledger = Ledger::new(Arc::new(InMemoryStore::new()));
        assert!(matches!(
            ledger.begin("../etc").await,
            Err(Error::InvalidRunId { .. })
        ));
        assert!(matches!(ledger.begin("").await, Err(Error::InvalidRunId { .. })));
    }

    #[tokio::test]
    async fn concurrent_transitions_on_different_modules() {
        let ledger = Ledger::new(Arc::new(InMemoryStore::new()));
        let handle = Arc::new(ledger.begin("r1").await.unwrap());
        let modules: Vec<String> = (0..16).map(|i| format!("m{i}")).collect();
        handle.register(&modules).await.unwrap();

        let mut tasks = Vec::new();
        for id in modules.clone() {
            let handle = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move {
                handle
                    .start(&id, &[], Parameters::new(), "d".into())
                    .await
                    .unwrap();
                handle
                    .transition(&id, LedgerStatus::Complete)
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = handle.snapshot().await;
        assert!(snapshot.iter().all(|e| e.status == LedgerStatus::Complete));
    }
}
