//! Engine-level metrics
//!
//! Per-sensor streaming metrics are recorded by the scheduler itself;
//! these cover what only the orchestrator knows.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Sensor documents that failed to load or validate
pub fn record_config_failures(count: usize) {
    if count > 0 {
        counter!("sta_ingest_sensor_config_failures_total").increment(count as u64);
    }
}

/// Wall time of one reconciliation pass
pub fn record_reconcile_duration(elapsed: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    histogram!("sta_ingest_reconcile_duration_ms", "status" => status)
        .record(elapsed.as_secs_f64() * 1_000.0);
}

/// Alive and dead sensor task counts
pub fn record_sensor_tasks(alive: usize, dead: usize) {
    gauge!("sta_ingest_sensor_tasks", "state" => "alive").set(alive as f64);
    gauge!("sta_ingest_sensor_tasks", "state" => "dead").set(dead as f64);
}

pub fn record_uptime(uptime: Duration) {
    gauge!("sta_ingest_uptime_seconds").set(uptime.as_secs_f64());
}
