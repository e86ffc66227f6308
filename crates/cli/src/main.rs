//! `drp`: operator entry point for the project pipeline.
//!
//! # Usage
//!
//! ```text
//! drp run <stage> [-n N] [-w N] [--start-row N] [--start-id N] [--json] [--metrics-file PATH]
//! drp stages
//! drp status [--json]
//! drp show <id> [--json]
//! drp clear-errors <id>
//! drp reset --yes
//! ```

mod commands;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drp_core::{
    load_config_or_default,
    stage::{NoopStage, NOOP_STAGE},
    validate_config, Config, LogFormat, Orchestrator, ProjectId, ProjectStore, SqliteProjectStore,
    StageRegistry,
};

use commands::RunArgs;

#[derive(Parser, Debug)]
#[command(
    name = "drp",
    version,
    about = "Run pipeline stages over the project store",
    long_about = None,
)]
struct Cli {
    /// Configuration file. Missing files fall back to defaults.
    #[arg(long, global = true, env = "DRP_CONFIG", default_value = "drp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one stage and print its summary.
    Run(RunArgs),

    /// List registered stages.
    Stages,

    /// Show project counts per status.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show one project.
    Show {
        id: ProjectId,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Remove every recorded error from a project.
    ClearErrors { id: ProjectId },

    /// Delete every project and restart id assignment.
    Reset {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("drp: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(&config);
    if !cli.config.exists() {
        warn!("Configuration file {:?} not found, using defaults", cli.config);
    }

    let store: Arc<dyn ProjectStore> = Arc::new(
        SqliteProjectStore::open(
            &config.database.path,
            Duration::from_millis(config.database.busy_timeout_ms),
        )
        .with_context(|| format!("Failed to open database {:?}", config.database.path))?,
    );
    info!("Database path: {:?}", config.database.path);

    match cli.command {
        Commands::Run(args) => {
            let orchestrator = Orchestrator::new(
                config.orchestrator.clone(),
                Arc::clone(&store),
                build_registry()?,
            );
            commands::run_stage(&orchestrator, args).await
        }
        Commands::Stages => {
            commands::list_stages(&build_registry()?);
            Ok(())
        }
        Commands::Status { json } => {
            let orchestrator =
                Orchestrator::new(config.orchestrator.clone(), store, build_registry()?);
            commands::show_status(&orchestrator, json)
        }
        Commands::Show { id, json } => commands::show_project(store.as_ref(), id, json),
        Commands::ClearErrors { id } => commands::clear_errors(store.as_ref(), id),
        Commands::Reset { yes } => commands::reset(store.as_ref(), yes),
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Stages known to this binary.
///
/// Real stages live with their integrations and register through the same
/// builder.
fn build_registry() -> Result<StageRegistry> {
    StageRegistry::builder()
        .batch(NOOP_STAGE, NoopStage)
        .build()
        .context("Invalid stage registry")
}
