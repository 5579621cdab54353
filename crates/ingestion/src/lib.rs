//! # Ingestion
//!
//! Upstream sensor reading and normalization.
//!
//! Responsibilities:
//! - Read vendor upstreams: Netatmo cloud polling, The Things Stack MQTT uplinks
//! - Share one vendor session per application across its sensors
//! - Map vendor-native fields to canonical observations, per sensor model
//! - Scripted mock sources for tests without an upstream
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{AdapterFactory, TransformMapper, VendorCredentials};
//!
//! let mut factory = AdapterFactory::new(&settings, VendorCredentials::from_env()?);
//! for binding in &topology.sensors {
//!     let adapter = factory.build(binding)?;
//!     let mapper = TransformMapper::for_model(binding.metadata.sensor_model);
//!     // hand both to the scheduler
//! }
//! ```

mod adapters;
mod credentials;
mod error;
mod factory;
mod mapper;
mod mock;

pub use adapters::{
    NetatmoAccount, NetatmoSource, TtsApplication, TtsSource, decode_uplink, device_eui,
    select_device, uplink_topic,
};
pub use credentials::{
    NETATMO_CREDENTIALS_ENV, NetatmoCredentials, TTS_CREDENTIALS_ENV, TtsCredentials,
    VendorCredentials,
};
pub use error::{IngestionError, Result};
pub use factory::AdapterFactory;
pub use mapper::{
    FieldIssue, FieldMapping, MILESIGHT_AM103L, MILESIGHT_AM308L, ModelTable, NETATMO_NWS03,
    TransformMapper, TransformMappingError, TransformOutput, ValueTransform,
};
pub use mock::{MockPollingSource, MockSubscribingSource, ScriptedFetch};
