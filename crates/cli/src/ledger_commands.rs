use std::{fmt::Write as _, process::ExitCode, sync::Arc};

use {
    anyhow::bail,
    clap::Subcommand,
    modsmith_ledger::{Ledger, LedgerEntry, LedgerStore},
};

use crate::workspace::Workspace;

#[derive(Subcommand)]
pub enum LedgerAction {
    /// List recorded run ids.
    Runs,
    /// Show the state of every module in a run.
    Show {
        #[arg(long)]
        run_id: String,
        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show every recorded status change of one module, across runs.
    History {
        #[arg(long = "module")]
        module_id: String,
    },
}

pub async fn handle_ledger(workspace: &Workspace, action: LedgerAction) -> anyhow::Result<ExitCode> {
    let store = workspace.ledger_store().await?;
    match action {
        LedgerAction::Runs => {
            let runs = store.list_runs().await?;
            if runs.is_empty() {
                println!("No runs recorded.");
            }
            for run in runs {
                println!("{run}");
            }
        },
        LedgerAction::Show { run_id, json } => {
            let entries = run_entries(store, &run_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print!("{}", render_entries(&entries));
            }
        },
        LedgerAction::History { module_id } => {
            let history = store.module_history(&module_id).await?;
            if history.is_empty() {
                println!("No records for {module_id}.");
            }
            for r in history {
                let error = r.error.map(|e| format!("  {e}")).unwrap_or_default();
                println!("{:>14} {:<20} #{:<4} {}{error}", r.at_ms, r.run_id, r.seq, r.status);
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_entries(
    store: Arc<dyn LedgerStore>,
    run_id: &str,
) -> anyhow::Result<Vec<LedgerEntry>> {
    if store.load_run(run_id).await?.is_empty() {
        bail!("no run named '{run_id}'");
    }
    let handle = Ledger::new(store).begin(run_id).await?;
    Ok(handle.snapshot().await)
}

fn render_entries(entries: &[LedgerEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        let _ = write!(out, "  {:<12} {}", e.status.to_string(), e.module_id);
        if e.attempts > 1 {
            let _ = write!(out, "  ({} attempts)", e.attempts);
        }
        if let Some(err) = &e.error {
            let _ = write!(out, "  {err}");
        }
        out.push('\n');
    }
    out
}
