//! Per-sensor task metrics

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lock-free counters of one sensor task
///
/// Written by the task (and by the subscription callback for hand-off drops),
/// read by the health report at any time.
#[derive(Debug, Default)]
pub struct SensorTaskMetrics {
    /// Reading batches accepted from the upstream
    payloads_received: AtomicU64,
    /// Observations the store accepted
    push_success: AtomicU64,
    /// Submissions that failed, retryable or not
    push_fail: AtomicU64,
    /// Observations the store refused and that were skipped
    rejected_payloads: AtomicU64,
    transform_errors: AtomicU64,
    auth_failures: AtomicU64,
    backoffs: AtomicU64,
    /// Observations (or hand-off batches) discarded by an overflow
    dropped_observations: AtomicU64,
    pending: AtomicUsize,
    /// 0 until the first accepted observation
    last_push_unix_ms: AtomicI64,
}

impl SensorTaskMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_payloads_received(&self) {
        self.payloads_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_success(&self, at: DateTime<Utc>) {
        self.push_success.fetch_add(1, Ordering::Relaxed);
        self.last_push_unix_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn inc_push_fail(&self) {
        self.push_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_transform_errors(&self, n: u64) {
        self.transform_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_backoffs(&self) {
        self.backoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.dropped_observations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pending(&self, len: usize) {
        self.pending.store(len, Ordering::Relaxed);
    }

    pub fn push_success(&self) -> u64 {
        self.push_success.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_observations.load(Ordering::Relaxed)
    }

    pub fn last_push(&self) -> Option<DateTime<Utc>> {
        match self.last_push_unix_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            payloads_received: self.payloads_received.load(Ordering::Relaxed),
            push_success: self.push_success(),
            push_fail: self.push_fail.load(Ordering::Relaxed),
            rejected_payloads: self.rejected_payloads.load(Ordering::Relaxed),
            transform_errors: self.transform_errors.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            dropped_observations: self.dropped(),
            pending: self.pending.load(Ordering::Relaxed),
            last_push: self.last_push(),
        }
    }
}

/// Point-in-time copy of a task's metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub payloads_received: u64,
    pub push_success: u64,
    pub push_fail: u64,
    pub rejected_payloads: u64,
    pub transform_errors: u64,
    pub auth_failures: u64,
    pub backoffs: u64,
    pub dropped_observations: u64,
    pub pending: usize,
    pub last_push: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Whole minutes since the last accepted observation
    pub fn minutes_since_push(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_push.map(|t| (now - t).num_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot() {
        let metrics = SensorTaskMetrics::new();
        assert!(metrics.snapshot().last_push.is_none());

        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        metrics.inc_payloads_received();
        metrics.record_push_success(t);
        metrics.record_push_success(t);
        metrics.inc_dropped();
        metrics.set_pending(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.payloads_received, 1);
        assert_eq!(snap.push_success, 2);
        assert_eq!(snap.dropped_observations, 1);
        assert_eq!(snap.pending, 3);
        assert_eq!(snap.last_push, Some(t));
        assert_eq!(
            snap.minutes_since_push(t + chrono::Duration::minutes(90)),
            Some(90)
        );
    }
}
