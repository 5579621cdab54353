//! Periodic health report
//!
//! Built from the scheduler's per-sensor statuses, logged every
//! `report_interval_secs` and once more as the shutdown summary.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{EntityName, SensorModel};
use scheduler::{MetricsSnapshot, SensorStatus, TaskState};
use serde::Serialize;
use tracing::{info, warn};

/// A sensor with no accepted observation for longer than this is flagged
pub const STALE_PUSH_MINUTES: i64 = 60;

/// One sensor's line in the report
#[derive(Debug, Clone, Serialize)]
pub struct SensorHealth {
    pub sensor: EntityName,
    pub model: SensorModel,
    pub state: TaskState,
    pub alive: bool,
    pub payloads_received: u64,
    pub observations_created: u64,
    pub rejected_observations: u64,
    pub failed_pushes: u64,
    pub dropped_observations: u64,
    /// None until the first accepted observation
    pub minutes_since_push: Option<i64>,
}

impl SensorHealth {
    fn from_status(status: &SensorStatus, now: DateTime<Utc>) -> Self {
        let MetricsSnapshot {
            payloads_received,
            push_success,
            push_fail,
            rejected_payloads,
            dropped_observations,
            ..
        } = status.metrics;
        Self {
            sensor: status.sensor.clone(),
            model: status.model,
            state: status.state,
            alive: status.alive,
            payloads_received,
            observations_created: push_success,
            rejected_observations: rejected_payloads,
            failed_pushes: push_fail,
            dropped_observations,
            minutes_since_push: status.metrics.minutes_since_push(now),
        }
    }

    /// Whether the last accepted observation is older than [`STALE_PUSH_MINUTES`]
    pub fn is_stale(&self) -> bool {
        self.minutes_since_push
            .is_some_and(|m| m > STALE_PUSH_MINUTES)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
    pub invalid_documents: usize,
    pub sensors: Vec<SensorHealth>,
}

impl HealthReport {
    pub fn collect(
        uptime: Duration,
        statuses: &[SensorStatus],
        invalid_documents: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            generated_at: now,
            uptime,
            invalid_documents,
            sensors: statuses
                .iter()
                .map(|s| SensorHealth::from_status(s, now))
                .collect(),
        }
    }

    pub fn alive(&self) -> impl Iterator<Item = &SensorHealth> {
        self.sensors.iter().filter(|s| s.alive)
    }

    pub fn dead(&self) -> impl Iterator<Item = &SensorHealth> {
        self.sensors.iter().filter(|s| !s.alive)
    }

    pub fn stale(&self) -> impl Iterator<Item = &SensorHealth> {
        self.sensors.iter().filter(|s| s.is_stale())
    }

    /// Emit the report through tracing and refresh the engine gauges
    pub fn log(&self) {
        let alive: Vec<&str> = self.alive().map(|s| &*s.sensor).collect();
        let dead: Vec<&str> = self.dead().map(|s| &*s.sensor).collect();
        crate::metrics::record_sensor_tasks(alive.len(), dead.len());
        crate::metrics::record_uptime(self.uptime);

        info!(uptime_secs = self.uptime.as_secs(), "periodic health report");
        if dead.is_empty() {
            info!(alive = ?alive, "all sensor tasks alive");
        } else {
            warn!(alive = ?alive, dead = ?dead, "some sensor tasks have died");
        }
        if self.invalid_documents > 0 {
            warn!(count = self.invalid_documents, "sensor configuration documents are invalid");
        }

        for s in &self.sensors {
            info!(
                sensor = %s.sensor,
                state = %s.state,
                payloads_received = s.payloads_received,
                observations_created = s.observations_created,
                minutes_since_push = ?s.minutes_since_push,
                "sensor throughput"
            );
            if s.rejected_observations > 0 || s.dropped_observations > 0 {
                warn!(
                    sensor = %s.sensor,
                    rejected = s.rejected_observations,
                    dropped = s.dropped_observations,
                    "observations lost"
                );
            }
        }
        for s in self.stale() {
            warn!(
                sensor = %s.sensor,
                minutes_since_push = ?s.minutes_since_push,
                "no observations pushed for over an hour"
            );
        }
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Health Report ===")?;
        writeln!(f, "Uptime: {}s", self.uptime.as_secs())?;
        let dead: Vec<&str> = self.dead().map(|s| &*s.sensor).collect();
        if dead.is_empty() {
            writeln!(f, "All {} sensor tasks alive", self.sensors.len())?;
        } else {
            writeln!(f, "Dead sensor tasks: {}", dead.join(", "))?;
        }
        if self.invalid_documents > 0 {
            writeln!(f, "Invalid sensor documents: {}", self.invalid_documents)?;
        }
        for s in &self.sensors {
            let since = match s.minutes_since_push {
                Some(m) => format!("{m}m since last push"),
                None => "no push yet".to_string(),
            };
            writeln!(
                f,
                "  {}: {} payloads, {} observations ({}), {} rejected, {} dropped",
                s.sensor,
                s.payloads_received,
                s.observations_created,
                since,
                s.rejected_observations,
                s.dropped_observations
            )?;
        }
        for s in self.stale() {
            writeln!(f, "WARNING: {} has not pushed for over an hour", s.sensor)?;
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status(name: &str, alive: bool, last_push: Option<DateTime<Utc>>) -> SensorStatus {
        SensorStatus {
            sensor: EntityName::from(name),
            model: SensorModel::MilesightAm308l,
            state: if alive {
                TaskState::Running
            } else {
                TaskState::Stopped
            },
            alive,
            metrics: MetricsSnapshot {
                payloads_received: 12,
                push_success: 40,
                push_fail: 2,
                rejected_payloads: 1,
                transform_errors: 0,
                auth_failures: 0,
                backoffs: 1,
                dropped_observations: 0,
                pending: 0,
                last_push,
            },
        }
    }

    #[test]
    fn test_report_flags_dead_and_stale() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let statuses = vec![
            status("fresh", true, Some(now - chrono::Duration::minutes(5))),
            status("stale", true, Some(now - chrono::Duration::minutes(61))),
            status("dead", false, None),
        ];
        let report = HealthReport::collect(Duration::from_secs(7_200), &statuses, 2, now);

        assert_eq!(report.alive().count(), 2);
        let dead: Vec<_> = report.dead().map(|s| s.sensor.to_string()).collect();
        assert_eq!(dead, vec!["dead"]);
        let stale: Vec<_> = report.stale().map(|s| s.sensor.to_string()).collect();
        assert_eq!(stale, vec!["stale"]);
        assert_eq!(report.sensors[0].minutes_since_push, Some(5));

        let text = report.to_string();
        assert!(text.contains("Dead sensor tasks: dead"));
        assert!(text.contains("Invalid sensor documents: 2"));
        assert!(text.contains("fresh: 12 payloads, 40 observations (5m since last push), 1 rejected"));
        assert!(text.contains("dead: 12 payloads, 40 observations (no push yet)"));
        assert!(text.contains("WARNING: stale has not pushed for over an hour"));
    }

    #[test]
    fn test_report_serializes() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let report = HealthReport::collect(Duration::from_secs(90), &[status("s1", true, None)], 0, now);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["uptime"], 90);
        assert_eq!(json["sensors"][0]["sensor"], "s1");
        assert_eq!(json["sensors"][0]["state"], "running");
    }
}
