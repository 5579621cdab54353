//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use config_loader::Topology;
use contracts::{EntityKind, SensorModel};
use serde::Serialize;
use tracing::info;

use super::common;
use crate::cli::InfoArgs;

/// Graph info for JSON output
#[derive(Serialize)]
struct GraphInfo {
    documents: usize,
    counts: BTreeMap<&'static str, usize>,
    sensors: Vec<SensorInfo>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    entities: BTreeMap<&'static str, Vec<String>>,
}

#[derive(Serialize)]
struct SensorInfo {
    name: String,
    model: SensorModel,
    application: String,
    host: String,
    datastreams: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let settings = common::load_settings(&args.config, None)?;
    let topology = common::load_topology(&settings, &args.config)?;
    info!(entities = topology.graph.len(), "Graph loaded");

    let graph_info = build_graph_info(&topology, args.entities);
    if args.json {
        let json =
            serde_json::to_string_pretty(&graph_info).context("Failed to serialize graph info")?;
        println!("{json}");
    } else {
        print_graph_info(&graph_info);
    }
    Ok(())
}

fn build_graph_info(topology: &Topology, with_entities: bool) -> GraphInfo {
    let graph = &topology.graph;
    let counts = EntityKind::ALL
        .into_iter()
        .map(|kind| (kind.as_str(), graph.count(kind)))
        .collect();

    let sensors = topology
        .sensors
        .iter()
        .map(|binding| SensorInfo {
            name: binding.sensor.to_string(),
            model: binding.metadata.sensor_model,
            application: binding.metadata.application_name.clone(),
            host: binding.metadata.host.clone(),
            datastreams: graph.datastreams_of(&binding.sensor).count(),
        })
        .collect();

    let entities = if with_entities {
        EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let names = graph.names(kind).map(|n| n.to_string()).collect();
                (kind.as_str(), names)
            })
            .collect()
    } else {
        BTreeMap::new()
    };

    GraphInfo {
        documents: topology.documents.len(),
        counts,
        sensors,
        entities,
    }
}

fn print_graph_info(info: &GraphInfo) {
    println!("=== Entity Graph ({} documents) ===\n", info.documents);
    for (kind, count) in &info.counts {
        println!("  {kind:<18} {count}");
    }

    println!("\nSensors ({})", info.sensors.len());
    for (i, sensor) in info.sensors.iter().enumerate() {
        let prefix = if i == info.sensors.len() - 1 { "└─" } else { "├─" };
        println!(
            "   {} {} [{}] app={} host={} ({} datastreams)",
            prefix, sensor.name, sensor.model, sensor.application, sensor.host, sensor.datastreams
        );
    }

    for (kind, names) in &info.entities {
        println!("\n{kind} ({})", names.len());
        for name in names {
            println!("   - {name}");
        }
    }
    println!();
}
