//! # sta-ingest
//!
//! Command-line entry point.
//!
//! Provides:
//! - Settings and sensor document loading with env/flag overrides
//! - Store reconciliation
//! - Streaming orchestration and lifecycle management
//! - Graceful shutdown handling

mod cli;
mod commands;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_reconcile, run_validate};
use observability::{level_for_verbosity, ObservabilityConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // metrics exporter is installed later by `run`, once its port is known
    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port: None,
        default_log_level: level_for_verbosity(cli.verbose, cli.quiet).to_string(),
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "sta-ingest starting");

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Reconcile(args) => run_reconcile(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = format!("{e:#}"), "Command failed");
    }

    result
}
