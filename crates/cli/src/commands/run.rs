//! `run` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use config_loader::Topology;
use contracts::EngineSettings;
use ingestion::VendorCredentials;
use tracing::{info, warn};

use super::common;
use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let settings = common::load_settings(&args.config, Some(&args.store))?;
    let topology = common::load_topology(&settings, &args.config)?;

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&settings, &topology);
        return Ok(());
    }

    let credentials =
        VendorCredentials::from_env().context("Failed to read vendor credentials")?;
    let client = common::store_client(&settings, &args.store)?;

    // 0 disables, absent falls back to the settings
    let metrics_port = match args.metrics_port {
        Some(0) => None,
        Some(port) => Some(port),
        None => settings.monitor.metrics_port,
    };

    let pipeline = Pipeline::new(PipelineConfig {
        settings,
        topology,
        duration: args.duration.map(Duration::from_secs),
        metrics_port,
    });

    info!("Starting pipeline...");
    let summary = pipeline
        .run(client, credentials, shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        observations = summary.observations_created(),
        aborted = summary.aborted.len(),
        duration_secs = summary.duration.as_secs_f64(),
        "Pipeline stopped"
    );
    summary.print_summary();
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(settings: &EngineSettings, topology: &Topology) {
    println!("\n=== Configuration Summary ===\n");
    println!("Store: {} (user {})", settings.store.endpoint, settings.store.user);
    println!("Sensor documents: {}", topology.documents.len());
    if !topology.invalid_documents.is_empty() {
        println!("Invalid documents skipped: {}", topology.invalid_documents.len());
    }
    println!("Entities: {}", topology.graph.len());
    println!("\nSensors ({}):", topology.sensors.len());
    for binding in &topology.sensors {
        println!(
            "  - {} ({}, {} @ {})",
            binding.sensor,
            binding.metadata.sensor_model,
            binding.metadata.application_name,
            binding.metadata.host
        );
    }
    println!(
        "\nPolling every {}s, backoff {}ms..{}ms",
        settings.scheduler.poll_interval_secs,
        settings.scheduler.initial_backoff_ms,
        settings.scheduler.max_backoff_ms
    );
    println!();
}
