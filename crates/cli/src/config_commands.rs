use std::{path::PathBuf, process::ExitCode};

use {
    modsmith_catalog::Selection,
    modsmith_config::validate::{self, Severity},
    modsmith_engine::{DetectorRegistry, Error as EngineError, Plan},
};

use crate::workspace::Workspace;

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn handle_validate(
    workspace: &Workspace,
    catalog: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<ExitCode> {
    let config_errors = check_config(workspace, verbose);

    let catalog_errors = match workspace.catalog_path(catalog) {
        Ok(path) => check_catalog(path),
        Err(_) => {
            eprintln!("No catalog configured; skipping catalog checks.");
            0
        },
    };

    if config_errors + catalog_errors > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn label(severity: Severity) -> (&'static str, &'static str) {
    match severity {
        Severity::Error => (RED, "error"),
        Severity::Warning => (YELLOW, "warning"),
        Severity::Info => (CYAN, "info"),
    }
}

fn check_config(workspace: &Workspace, verbose: bool) -> usize {
    let result = validate::validate(workspace.config_path.as_deref());

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        let (color, label) = label(d.severity);
        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if shown > 0 {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }
    errors
}

/// Loads the whole catalog (every status) and builds its graph.
fn check_catalog(path: PathBuf) -> usize {
    eprintln!("\nChecking catalog {}\n", path.display());
    let selection = Selection {
        include_experimental: true,
        ..Selection::all()
    };
    match Plan::prepare(path, &selection, &DetectorRegistry::with_builtins()) {
        Ok(plan) => {
            eprintln!("{} module(s), no issues found.", plan.catalog.len());
            0
        },
        Err(EngineError::Catalog(e)) if !e.violations().is_empty() => {
            let (color, label) = label(Severity::Error);
            for v in e.violations() {
                eprintln!("  {BOLD}{color}{label}{RESET} {v}");
            }
            eprintln!("\n{} error(s)", e.violations().len());
            e.violations().len()
        },
        Err(e) => {
            let (color, label) = label(Severity::Error);
            eprintln!("  {BOLD}{color}{label}{RESET} {e}");
            1
        },
    }
}
