//! `reconcile` command implementation.

use std::time::Instant;

use anyhow::{Context, Result};
use contracts::EntityKind;
use store_client::{ReconcileReport, Reconciler};
use tracing::info;

use super::common;
use crate::cli::ReconcileArgs;

/// Execute the `reconcile` command
pub async fn run_reconcile(args: &ReconcileArgs) -> Result<()> {
    let settings = common::load_settings(&args.config, Some(&args.store))?;
    let topology = common::load_topology(&settings, &args.config)?;
    let client = common::store_client(&settings, &args.store)?;

    let started = Instant::now();
    let result = Reconciler::new(&client)
        .with_settings(&settings.store)
        .reconcile(&topology.graph)
        .await;
    observability::record_reconcile_duration(started.elapsed(), result.is_ok());
    let report = result.context("Reconciliation failed")?;

    info!(
        created = report.created.len(),
        existing = report.existing.len(),
        "Reconciliation complete"
    );

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize reconcile report")?;
        println!("{json}");
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    println!("\n=== Reconcile Report ===\n");
    for kind in EntityKind::ALL {
        println!(
            "{:<18} {:>4} created  {:>4} existing",
            kind.as_str(),
            report.created_count(kind),
            report.existing_count(kind)
        );
    }
    if !report.created.is_empty() {
        println!("\nCreated:");
        for entity in &report.created {
            println!("  {} '{}' -> {}", entity.kind, entity.name, entity.id);
        }
    }
    println!("\nTook {:.2}s", report.duration.as_secs_f64());
}
