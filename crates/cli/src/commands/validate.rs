//! `validate` command implementation.

use anyhow::{Context, Result};
use config_loader::Topology;
use ingestion::ModelTable;
use serde::Serialize;
use tracing::info;

use super::common;
use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<TopologySummary>,
}

#[derive(Serialize)]
struct TopologySummary {
    sensors_dir: String,
    documents: usize,
    invalid_documents: usize,
    entities: usize,
    sensors: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.config.display(), "Validating configuration");

    let result = validate(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.config.display().to_string();
    let loaded = common::load_settings(&args.config, None).and_then(|settings| {
        let topology = common::load_topology(&settings, &args.config)?;
        Ok((settings, topology))
    });

    match loaded {
        Ok((settings, topology)) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: collect_warnings(&topology),
            summary: Some(TopologySummary {
                sensors_dir: settings.sensors_dir.display().to_string(),
                documents: topology.documents.len(),
                invalid_documents: topology.invalid_documents.len(),
                entities: topology.graph.len(),
                sensors: topology.sensors.len(),
            }),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("{e:#}")),
            warnings: Vec::new(),
            summary: None,
        },
    }
}

/// Collect non-fatal issues
fn collect_warnings(topology: &Topology) -> Vec<String> {
    let mut warnings = Vec::new();

    for binding in &topology.sensors {
        let model = binding.metadata.sensor_model;
        let table = ModelTable::for_model(model);
        for ds in topology.graph.datastreams_of(&binding.sensor) {
            let stream = ds.stream_name();
            if table.produces(stream) {
                continue;
            }
            if produced_by_any_model(stream) {
                warnings.push(format!(
                    "Sensor '{}' ({model}) never produces stream '{stream}' of Datastream '{}'",
                    binding.sensor, ds.name
                ));
            } else {
                warnings.push(format!(
                    "No sensor model produces stream '{stream}' (Datastream '{}')",
                    ds.name
                ));
            }
        }
    }

    for invalid in &topology.invalid_documents {
        warnings.push(format!(
            "Skipped invalid document {}: {}",
            invalid.path.display(),
            invalid.reason
        ));
    }
    for template in &topology.skipped_templates {
        warnings.push(format!("Skipped template file {}", template.display()));
    }

    warnings
}

fn produced_by_any_model(stream: &str) -> bool {
    [
        &ingestion::NETATMO_NWS03,
        &ingestion::MILESIGHT_AM308L,
        &ingestion::MILESIGHT_AM103L,
    ]
    .iter()
    .any(|table| table.produces(stream))
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Sensors dir: {}", summary.sensors_dir);
            println!("  Documents: {}", summary.documents);
            if summary.invalid_documents > 0 {
                println!("  Invalid documents: {}", summary.invalid_documents);
            }
            println!("  Entities: {}", summary.entities);
            println!("  Sensors: {}", summary.sensors);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {warning}");
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {error}");
        }
    }
}
