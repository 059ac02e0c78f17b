mod config_commands;
mod ledger_commands;
mod run_commands;
mod workspace;

use std::{path::PathBuf, process::ExitCode};

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "modsmith", about = "Modsmith: install catalog modules in dependency order")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./modsmith.toml and the user config dir).
    #[arg(long, global = true, env = "MODSMITH_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install modules from a catalog.
    Run(run_commands::RunArgs),
    /// Show the install order without installing anything.
    Plan(run_commands::PlanArgs),
    /// Check the config file and, if given, a catalog.
    Validate {
        /// Catalog to validate (defaults to `catalog.path` from the config).
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Inspect the installation ledger.
    Ledger {
        #[command(subcommand)]
        action: ledger_commands::LedgerAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries reports, logs go to stderr
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "modsmith starting");

    let mut workspace = workspace::Workspace::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Run(args) => run_commands::handle_run(&mut workspace, args).await,
        Commands::Plan(args) => run_commands::handle_plan(&workspace, args),
        Commands::Validate { catalog, verbose } => {
            config_commands::handle_validate(&workspace, catalog, verbose)
        },
        Commands::Ledger { action } => ledger_commands::handle_ledger(&workspace, action).await,
    }
}
