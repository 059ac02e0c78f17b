//! Walks the dependency graph and installs modules on a bounded worker pool.
//!
//! The scheduling loop is the only place that dispatches. A module is handed
//! to a worker once every dependency is `complete` or `skipped` in the
//! ledger; the ledger checks the same condition again under the module's
//! lock before accepting the `in_progress` transition. A failed module keeps
//! all of its dependents `pending` for the rest of the run while unrelated
//! branches carry on.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use {
    modsmith_catalog::{DependencyGraph, ModuleDescriptor},
    modsmith_common::{digest_value, now_ms},
    modsmith_ledger::{LedgerEntry, LedgerHandle, LedgerStatus, Parameters, TransitionDetails},
    serde::{Deserialize, Serialize},
    tokio::task::{Id, JoinSet},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    Result,
    error::{InstallError, MergeConflict},
    installer::{InstallContext, Installer},
    merge::MergeResult,
    params::{Overrides, ParameterResolver},
    report::{MergeRecord, ModuleReport, RunReport},
    target::Merger,
};

pub const DEFAULT_WORKERS: usize = 4;

/// Scheduling state of one module within the current invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Waiting,
    Running,
    Done(LedgerStatus),
    /// Stays `pending`: these failed modules are upstream.
    Blocked(Vec<String>),
}

enum Readiness {
    Ready,
    NotYet,
    Blocked(Vec<String>),
}

/// Everything a worker needs, shared across the run.
struct Shared {
    ledger: Arc<LedgerHandle>,
    installer: Arc<dyn Installer>,
    merger: Arc<dyn Merger>,
    resolver: Arc<ParameterResolver>,
    overrides: Arc<Overrides>,
    ctx: InstallContext,
}

struct Job {
    module: ModuleDescriptor,
    dependencies: Vec<String>,
    /// Ledger status when dispatched: `pending`, or `in_progress` for a
    /// module interrupted by an earlier process.
    status: LedgerStatus,
}

type Outcome = (ModuleReport, Vec<MergeConflict>);

/// Merge results kept on a module's `complete` record, so a resumed run
/// reports the same conflicts as the run that produced them.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordedMerges {
    merges: Vec<MergeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<MergeConflict>,
}

/// Drives installation runs.
pub struct Orchestrator {
    installer: Arc<dyn Installer>,
    merger: Arc<dyn Merger>,
    resolver: Arc<ParameterResolver>,
    workers: usize,
}

impl Orchestrator {
    pub fn new(
        installer: Arc<dyn Installer>,
        merger: Arc<dyn Merger>,
        resolver: Arc<ParameterResolver>,
    ) -> Self {
        Self {
            installer,
            merger,
            resolver,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Maximum number of modules installing at once. Clamped to at least 1.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn resolver(&self) -> &Arc<ParameterResolver> {
        &self.resolver
    }

    /// Install every module of `graph` under the run `ledger` belongs to.
    ///
    /// Modules the ledger already shows as finished are not touched, so
    /// calling this again with a reopened handle resumes an interrupted run.
    /// Once `cancel` fires no new module starts; modules already installing
    /// finish and the rest stay `pending`.
    ///
    /// Only ledger backend failures abort the run. Module failures and merge
    /// conflicts end up in the report.
    pub async fn run(
        &self,
        graph: &DependencyGraph,
        ledger: Arc<LedgerHandle>,
        overrides: &Overrides,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let started_at_ms = now_ms();
        let run_id = ledger.run_id().to_string();
        let order = graph.order_ids();
        ledger.register(&order).await?;
        info!(run_id = %run_id, modules = order.len(), workers = self.workers, "run started");

        let shared = Arc::new(Shared {
            ledger: Arc::clone(&ledger),
            installer: Arc::clone(&self.installer),
            merger: Arc::clone(&self.merger),
            resolver: Arc::clone(&self.resolver),
            overrides: Arc::new(overrides.clone()),
            ctx: InstallContext {
                run_id: run_id.clone(),
                target_root: self.resolver.target_root().to_path_buf(),
                cancel: cancel.clone(),
            },
        });

        let mut slots: HashMap<String, Slot> = HashMap::new();
        let mut reports: HashMap<String, ModuleReport> = HashMap::new();
        let mut conflicts = Vec::new();
        for entry in ledger.snapshot().await {
            if !graph.contains(&entry.module_id) {
                continue;
            }
            let slot = if entry.status.is_terminal() {
                debug!(run_id = %run_id, module = %entry.module_id, status = %entry.status, "already finished");
                let (report, recorded) = report_from_entry(&entry);
                reports.insert(entry.module_id.clone(), report);
                conflicts.extend(recorded);
                Slot::Done(entry.status)
            } else {
                Slot::Waiting
            };
            slots.insert(entry.module_id.clone(), slot);
        }

        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();
        let mut cancel_seen = false;

        loop {
            for id in &order {
                if slots.get(id) != Some(&Slot::Waiting) {
                    continue;
                }
                match readiness(graph, id, &slots) {
                    Readiness::Blocked(by) => {
                        warn!(run_id = %run_id, module = %id, blocked_by = ?by, "dependency failed, not starting");
                        slots.insert(id.clone(), Slot::Blocked(by));
                    },
                    Readiness::Ready if !cancel.is_cancelled() && tasks.len() < self.workers => {
                        let Some(module) = graph.get(id) else {
                            continue;
                        };
                        let status = ledger.status(id).await.unwrap_or(LedgerStatus::Pending);
                        let job = Job {
                            module: module.clone(),
                            dependencies: graph
                                .dependencies(id)
                                .into_iter()
                                .map(str::to_string)
                                .collect(),
                            status,
                        };
                        debug!(run_id = %run_id, module = %id, "dispatching");
                        let handle = tasks.spawn(run_module(Arc::clone(&shared), job));
                        running.insert(handle.id(), id.clone());
                        slots.insert(id.clone(), Slot::Running);
                    },
                    Readiness::Ready | Readiness::NotYet => {},
                }
            }

            if tasks.is_empty() {
                break;
            }

            let in_flight = tasks.len();
            let joined = tokio::select! {
                biased;
                joined = tasks.join_next_with_id() => joined,
                () = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!(run_id = %run_id, in_flight, "cancellation requested, waiting for running modules");
                    continue;
                },
            };
            let Some(joined) = joined else {
                break;
            };

            let (report, module_conflicts) = match joined {
                Ok((task_id, outcome)) => {
                    running.remove(&task_id);
                    outcome
                },
                Err(join_error) => {
                    let Some(module_id) = running.remove(&join_error.id()) else {
                        error!(run_id = %run_id, error = %join_error, "worker lost");
                        continue;
                    };
                    error!(run_id = %run_id, module = %module_id, error = %join_error, "installer panicked");
                    let mut report = ModuleReport::new(&module_id, LedgerStatus::Failed);
                    fail(
                        &ledger,
                        &mut report,
                        format!("installer panicked: {join_error}"),
                        None,
                    )
                    .await;
                    (report, Vec::new())
                },
            };

            slots.insert(report.module_id.clone(), Slot::Done(report.status));
            conflicts.extend(module_conflicts);
            reports.insert(report.module_id.clone(), report);
        }

        let modules: Vec<ModuleReport> = order
            .iter()
            .map(|id| match (reports.remove(id), slots.get(id)) {
                (Some(report), _) => report,
                (None, Some(Slot::Blocked(by))) => {
                    let mut report = ModuleReport::new(id, LedgerStatus::Pending);
                    report.blocked_by = by.clone();
                    report
                },
                (None, _) => ModuleReport::new(id, LedgerStatus::Pending),
            })
            .collect();

        let report = RunReport {
            run_id,
            order,
            modules,
            conflicts,
            cancelled: cancel.is_cancelled(),
            started_at_ms,
            finished_at_ms: now_ms(),
        };
        info!(
            run_id = %report.run_id,
            complete = report.count(LedgerStatus::Complete),
            skipped = report.count(LedgerStatus::Skipped),
            failed = report.count(LedgerStatus::Failed),
            pending = report.count(LedgerStatus::Pending),
            conflicts = report.conflicts.len(),
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }
}

fn readiness(graph: &DependencyGraph, id: &str, slots: &HashMap<String, Slot>) -> Readiness {
    let mut blockers: Vec<String> = Vec::new();
    let mut waiting = false;
    for dep in graph.dependencies(id) {
        match slots.get(dep) {
            Some(Slot::Done(status)) if status.is_satisfied() => {},
            Some(Slot::Done(_)) => blockers.push(dep.to_string()),
            Some(Slot::Blocked(by)) => blockers.extend(by.iter().cloned()),
            Some(Slot::Waiting | Slot::Running) | None => waiting = true,
        }
    }
    if !blockers.is_empty() {
        let mut seen = HashSet::new();
        blockers.retain(|b| seen.insert(b.clone()));
        return Readiness::Blocked(blockers);
    }
    if waiting {
        Readiness::NotYet
    } else {
        Readiness::Ready
    }
}

/// Rebuild the report of a module finished by an earlier invocation,
/// together with the conflicts its merges hit.
fn report_from_entry(entry: &LedgerEntry) -> Outcome {
    let mut report = ModuleReport::new(&entry.module_id, entry.status);
    report.resolved_parameters = entry.resolved_parameters.clone();
    report.error = entry.error.clone();
    report.attempts = entry.attempts;

    let recorded = match entry.outcome.clone().map(serde_json::from_value::<RecordedMerges>) {
        Some(Ok(recorded)) => recorded,
        Some(Err(e)) => {
            warn!(run_id = %entry.run_id, module = %entry.module_id, error = %e, "unreadable merge outcome in ledger");
            RecordedMerges::default()
        },
        None => RecordedMerges::default(),
    };
    report.merges = recorded.merges;
    (report, recorded.conflicts)
}

/// Record a failure in the ledger and the report. A ledger error here is
/// logged rather than raised: the module has failed either way.
async fn fail(
    ledger: &LedgerHandle,
    report: &mut ModuleReport,
    message: String,
    parameters: Option<Parameters>,
) {
    warn!(run_id = %ledger.run_id(), module = %report.module_id, error = %message, "module failed");
    let details = TransitionDetails {
        parameters,
        error: Some(message.clone()),
        ..TransitionDetails::default()
    };
    match ledger
        .transition_with(&report.module_id, LedgerStatus::Failed, details)
        .await
    {
        Ok(entry) => report.attempts = entry.attempts,
        Err(e) => {
            error!(run_id = %ledger.run_id(), module = %report.module_id, error = %e, "could not record failure");
        },
    }
    report.status = LedgerStatus::Failed;
    report.error = Some(message);
}

async fn run_module(shared: Arc<Shared>, job: Job) -> Outcome {
    let module_id = job.module.id.clone();
    let ledger = &shared.ledger;
    let mut report = ModuleReport::new(&module_id, job.status);

    let params = {
        let resolver = Arc::clone(&shared.resolver);
        let overrides = Arc::clone(&shared.overrides);
        let module = job.module.clone();
        match tokio::task::spawn_blocking(move || resolver.resolve(&module, &overrides)).await {
            Ok(Ok(params)) => params,
            Ok(Err(e)) => {
                fail(ledger, &mut report, e.to_string(), None).await;
                return (report, Vec::new());
            },
            Err(e) => {
                fail(ledger, &mut report, format!("parameter resolution panicked: {e}"), None)
                    .await;
                return (report, Vec::new());
            },
        }
    };
    report.resolved_parameters = Some(params.clone());

    let digest = match digest_value(&params) {
        Ok(digest) => digest,
        Err(e) => {
            fail(ledger, &mut report, format!("cannot digest parameters: {e}"), Some(params)).await;
            return (report, Vec::new());
        },
    };

    if job.status == LedgerStatus::Pending {
        match ledger.prior_satisfied(&module_id, &digest).await {
            Ok(Some(prior)) => {
                let details = TransitionDetails {
                    parameters: Some(params),
                    parameters_digest: Some(digest),
                    ..TransitionDetails::default()
                };
                match ledger
                    .transition_with(&module_id, LedgerStatus::Skipped, details)
                    .await
                {
                    Ok(_) => {
                        info!(run_id = %ledger.run_id(), module = %module_id, satisfied_by = %prior.run_id, "already installed with same parameters, skipping");
                        report.status = LedgerStatus::Skipped;
                    },
                    Err(e) => fail(ledger, &mut report, e.to_string(), None).await,
                }
                return (report, Vec::new());
            },
            Ok(None) => {},
            Err(e) => {
                fail(ledger, &mut report, e.to_string(), Some(params)).await;
                return (report, Vec::new());
            },
        }
    }

    let deps: Vec<&str> = job.dependencies.iter().map(String::as_str).collect();
    match ledger.start(&module_id, &deps, params.clone(), digest).await {
        Ok(entry) => {
            report.status = LedgerStatus::InProgress;
            report.attempts = entry.attempts;
        },
        Err(e) => {
            fail(ledger, &mut report, e.to_string(), None).await;
            return (report, Vec::new());
        },
    }
    info!(run_id = %ledger.run_id(), module = %module_id, attempt = report.attempts, "installing");

    let installed = {
        let shared = Arc::clone(&shared);
        let module = job.module;
        tokio::task::spawn_blocking(move || install_and_merge(&shared, &module, &params)).await
    };

    match installed {
        Ok(Ok((merges, conflicts))) => {
            let recorded = RecordedMerges { merges, conflicts };
            let outcome = serde_json::to_value(&recorded)
                .inspect_err(|e| {
                    warn!(run_id = %ledger.run_id(), module = %module_id, error = %e, "cannot record merge outcome");
                })
                .ok();
            let details = TransitionDetails {
                outcome,
                ..TransitionDetails::default()
            };
            let RecordedMerges { merges, conflicts } = recorded;
            report.merges = merges;
            match ledger
                .transition_with(&module_id, LedgerStatus::Complete, details)
                .await
            {
                Ok(_) => {
                    info!(
                        run_id = %ledger.run_id(),
                        module = %module_id,
                        fragments = report.merges.len(),
                        conflicts = conflicts.len(),
                        "module complete"
                    );
                    report.status = LedgerStatus::Complete;
                },
                Err(e) => fail(ledger, &mut report, e.to_string(), None).await,
            }
            (report, conflicts)
        },
        Ok(Err(e)) => {
            fail(ledger, &mut report, e.to_string(), None).await;
            (report, Vec::new())
        },
        Err(e) => {
            fail(ledger, &mut report, format!("installer panicked: {e}"), None).await;
            (report, Vec::new())
        },
    }
}

/// Blocking part of a module: run the installer, check every fragment
/// targets a declared path, then merge them in order.
fn install_and_merge(
    shared: &Shared,
    module: &ModuleDescriptor,
    params: &Parameters,
) -> std::result::Result<(Vec<MergeRecord>, Vec<MergeConflict>), InstallError> {
    let mut fragments = shared.installer.install(&shared.ctx, module, params)?;

    for fragment in &mut fragments {
        fragment.module_id.clone_from(&module.id);
        if !module.declares_target(&fragment.target_path) {
            return Err(InstallError::UndeclaredTarget {
                module_id: module.id.clone(),
                target_path: fragment.target_path.clone(),
            });
        }
    }

    let mut merges = Vec::with_capacity(fragments.len());
    let mut conflicts = Vec::new();
    for fragment in fragments {
        let target_path = fragment.target_path.clone();
        let result = shared.merger.apply(fragment)?;
        merges.push(MergeRecord::new(&target_path, &result));
        if let MergeResult::Conflict(conflict) = result {
            conflicts.push(conflict);
        }
    }
    Ok((merges, conflicts))
}
