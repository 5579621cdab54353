//! EngineSettings - engine settings file schema
//!
//! Every field has a default; an empty file (or no file) is a valid
//! configuration for a local FROST server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding the per-sensor documents
    pub sensors_dir: PathBuf,

    pub store: StoreSettings,

    pub scheduler: SchedulerSettings,

    pub monitor: MonitorSettings,

    pub vendors: VendorSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sensors_dir: PathBuf::from("sensor_configs"),
            store: StoreSettings::default(),
            scheduler: SchedulerSettings::default(),
            monitor: MonitorSettings::default(),
            vendors: VendorSettings::default(),
        }
    }
}

/// Remote entity store connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Service root, e.g. `http://localhost:8080/FROST-Server/v1.1`
    pub endpoint: String,

    /// Basic-auth user; the password is supplied out of band
    pub user: String,

    /// Ceiling for every find/create/submit call
    pub request_timeout_secs: u64,

    /// Attempts per entity when the store is unavailable during reconciliation
    pub reconcile_max_attempts: u32,

    /// Pause between those attempts
    pub reconcile_retry_delay_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/FROST-Server/v1.1".to_string(),
            user: "sta-manager".to_string(),
            request_timeout_secs: 10,
            reconcile_max_attempts: 3,
            reconcile_retry_delay_ms: 500,
        }
    }
}

impl StoreSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconcile_retry_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_retry_delay_ms)
    }
}

/// Per-sensor task behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Polling interval
    pub poll_interval_secs: u64,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    pub backoff_multiplier: f64,

    /// Fraction of each delay that is randomized, in `[0, 1)`
    pub backoff_jitter: f64,

    /// Ceiling for one upstream fetch
    pub fetch_timeout_secs: u64,

    /// How long shutdown waits for in-flight work
    pub shutdown_grace_secs: u64,

    /// Unacknowledged observations kept per sensor before the oldest is dropped
    pub max_pending_observations: usize,

    /// Hand-off capacity between a subscription callback and its task
    pub subscription_buffer: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
            backoff_multiplier: 2.0,
            backoff_jitter: 0.1,
            fetch_timeout_secs: 30,
            shutdown_grace_secs: 10,
            max_pending_observations: 1_000,
            subscription_buffer: 64,
        }
    }
}

impl SchedulerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Health reporting and metrics export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub report_interval_secs: u64,

    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            report_interval_secs: 1_800,
            metrics_port: None,
        }
    }
}

impl MonitorSettings {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    pub netatmo: NetatmoSettings,
    pub tts: TtsSettings,
}

/// Netatmo cloud API endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetatmoSettings {
    pub token_url: String,
    pub data_url: String,
}

impl Default for NetatmoSettings {
    fn default() -> Self {
        Self {
            token_url: "https://api.netatmo.com/oauth2/token".to_string(),
            data_url: "https://api.netatmo.com/api/getstationsdata".to_string(),
        }
    }
}

/// The Things Stack MQTT connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub port: u16,
    pub tls: bool,
    pub keep_alive_secs: u64,
    /// Delay before reconnecting after the broker drops or refuses us
    pub reconnect_delay_secs: u64,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            port: 8883,
            tls: true,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}
