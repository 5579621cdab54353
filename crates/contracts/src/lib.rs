//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the ingestion engine.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Model
//! - Entities mirror the OGC SensorThings data model and are keyed by name
//! - Remote identities (`RemoteId`) are assigned by the entity store and never invented locally
//! - Time is UTC (`chrono::DateTime<Utc>`) everywhere

mod document;
mod entity;
mod error;
mod graph;
mod name;
mod observation;
mod remote_id;
mod settings;
mod sink;
mod source;

pub use document::*;
pub use entity::*;
pub use error::*;
pub use graph::*;
pub use name::{name_filter, EntityName};
pub use observation::*;
pub use remote_id::RemoteId;
pub use settings::*;
pub use sink::*;
pub use source::*;
