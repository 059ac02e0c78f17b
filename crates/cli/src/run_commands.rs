use std::{
    io::{BufRead, BufReader, Stdin, Write},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use {
    clap::Args,
    modsmith_catalog::{DefaultStrategy, ModuleDescriptor, ParameterSpec, Selection},
    modsmith_config::RunMode,
    modsmith_engine::{
        DetectorRegistry, Orchestrator, ParameterResolver, Plan, Prompter, TargetTree,
        TemplateInstaller,
    },
    modsmith_ledger::Ledger,
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::workspace::Workspace;

#[derive(Args)]
pub struct RunArgs {
    /// Module to install (its dependencies come along). Repeatable. None
    /// means every stable module in the catalog.
    #[arg(long = "module", value_name = "ID")]
    modules: Vec<String>,
    /// Catalog file (overrides `catalog.path`).
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Target tree to install into (overrides `target.root`).
    #[arg(long)]
    target: Option<PathBuf>,
    /// Run id. Reusing the id of an interrupted run resumes it.
    #[arg(long)]
    run_id: Option<String>,
    /// Modules installing at once (overrides `engine.workers`).
    #[arg(long)]
    workers: Option<usize>,
    /// Ask for `prompt-user` parameters on the terminal.
    #[arg(long)]
    interactive: bool,
    /// Also pick `experimental` modules when no module is named.
    #[arg(long)]
    include_experimental: bool,
    /// Parameter override, `name=value` or `module.name=value`. Repeatable.
    #[arg(long = "set", value_name = "ASSIGNMENT")]
    set: Vec<String>,
    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    #[arg(long = "module", value_name = "ID")]
    modules: Vec<String>,
    #[arg(long)]
    catalog: Option<PathBuf>,
    #[arg(long)]
    include_experimental: bool,
    #[arg(long)]
    json: bool,
}

fn selection(workspace: &Workspace, modules: Vec<String>, include_experimental: bool) -> Selection {
    Selection {
        roots: modules,
        include_experimental: include_experimental || workspace.config.engine.include_experimental,
    }
}

pub fn handle_plan(workspace: &Workspace, args: PlanArgs) -> anyhow::Result<ExitCode> {
    let plan = Plan::prepare(
        workspace.catalog_path(args.catalog)?,
        &selection(workspace, args.modules, args.include_experimental),
        &DetectorRegistry::with_builtins(),
    )?;

    if args.json {
        let steps: Vec<Value> = plan
            .graph
            .order()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "depends_on": plan.graph.dependencies(&m.id),
                    "status": m.status.to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&steps)?);
    } else {
        for (i, module) in plan.graph.order().enumerate() {
            let deps = plan.graph.dependencies(&module.id);
            if deps.is_empty() {
                println!("{:>3}. {}", i + 1, module.id);
            } else {
                println!("{:>3}. {}  (after {})", i + 1, module.id, deps.join(", "));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn handle_run(workspace: &mut Workspace, args: RunArgs) -> anyhow::Result<ExitCode> {
    if let Some(target) = args.target {
        workspace.set_target_root(target);
    }
    let config = &workspace.config;
    let mode = if args.interactive {
        RunMode::Interactive
    } else {
        config.engine.mode
    };

    let detectors = DetectorRegistry::with_builtins();
    let plan = Plan::prepare(
        workspace.catalog_path(args.catalog)?,
        &selection(workspace, args.modules, args.include_experimental),
        &detectors,
    )?;
    let overrides = workspace.overrides(&args.set)?;

    let root = workspace.target_root().to_path_buf();
    std::fs::create_dir_all(&root)?;
    let mut resolver = ParameterResolver::new(mode, &root).with_detectors(detectors);
    if mode == RunMode::Interactive {
        resolver = resolver.with_prompter(Arc::new(LinePrompter::stdin()));
    }
    let orchestrator = Orchestrator::new(
        Arc::new(TemplateInstaller::new(plan.catalog.base_dir())),
        Arc::new(TargetTree::new(&root, workspace.baselines()?)),
        Arc::new(resolver),
    )
    .with_workers(args.workers.unwrap_or(config.engine.workers));

    let run_id = args
        .run_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ledger = Ledger::new(workspace.ledger_store().await?)
        .begin(&run_id)
        .await?;
    if let Some(next) = ledger.resume_point().await {
        info!(run_id = %run_id, next = %next, "resuming run");
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, letting running modules finish");
            on_signal.cancel();
        }
    });

    let report = orchestrator
        .run(&plan.graph, Arc::new(ledger), &overrides, &cancel)
        .await?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
        if report.cancelled {
            eprintln!("resume with: modsmith run --run-id {run_id}");
        }
    }
    Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
}

/// Answers `prompt-user` parameters from a line-oriented reader. An empty
/// line leaves the parameter unanswered.
pub struct LinePrompter<R> {
    input: Mutex<R>,
}

impl LinePrompter<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(std::io::stdin()))
    }
}

impl<R: BufRead + Send> LinePrompter<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

fn prompt_text(spec: &ParameterSpec) -> &str {
    match &spec.default {
        DefaultStrategy::PromptUser {
            prompt: Some(prompt),
        } => prompt.as_str(),
        _ => spec.description.as_deref().unwrap_or(&spec.name),
    }
}

/// JSON when it parses (`8080`, `true`, `["a"]`), a plain string otherwise.
fn answer_value(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string())))
}

impl<R: BufRead + Send> Prompter for LinePrompter<R> {
    fn ask(&self, module: &ModuleDescriptor, spec: &ParameterSpec) -> Result<Option<Value>, String> {
        let mut stderr = std::io::stderr().lock();
        write!(stderr, "[{}] {} ({}): ", module.id, prompt_text(spec), spec.name)
            .and_then(|()| stderr.flush())
            .map_err(|e| e.to_string())?;

        let mut line = String::new();
        let read = self
            .input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read_line(&mut line)
            .map_err(|e| e.to_string())?;
        if read == 0 {
            return Err("input closed".into());
        }
        Ok(answer_value(&line))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, std::io::Cursor};

    #[test]
    fn answers_parse_as_json_or_text() {
        assert_eq!(answer_value("8080\n"), Some(json!(8080)));
        assert_eq!(answer_value("ghcr.io\n"), Some(json!("ghcr.io")));
        assert_eq!(answer_value("  \n"), None);
    }

    #[test]
    fn prompter_reads_one_line_per_question() {
        let prompter = LinePrompter::new(Cursor::new("app\n\n"));
        let module = ModuleDescriptor::new("lang/python");
        let spec = ParameterSpec::new("installPath", DefaultStrategy::prompt("Where?"));
        assert_eq!(prompter.ask(&module, &spec).unwrap(), Some(json!("app")));
        assert_eq!(prompter.ask(&module, &spec).unwrap(), None);
        assert!(prompter.ask(&module, &spec).is_err());
    }

    #[test]
    fn prompt_text_falls_back_to_description() {
        let mut spec = ParameterSpec::new("port", DefaultStrategy::PromptUser { prompt: None });
        assert_eq!(prompt_text(&spec), "port");
        spec.description = Some("Listen port".into());
        assert_eq!(prompt_text(&spec), "Listen port");
    }
}
