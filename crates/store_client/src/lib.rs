//! # Store Client
//!
//! Remote entity store access and reconciliation.
//!
//! Responsibilities:
//! - Find-by-name and create against a SensorThings entity API
//! - Cache `(kind, name) -> RemoteId` for lock-free reads while streaming
//! - Reconcile a merged `EntityGraph` idempotently, in dependency order
//! - Submit observations on behalf of sensor tasks (`StoreSink`)
//!
//! The HTTP transport (`FrostStore`) and the in-memory `MockStore` share the
//! `RemoteStore` trait, so everything above it is tested without a server.

pub mod cache;
pub mod client;
pub mod error;
pub mod frost;
pub mod mock_store;
pub mod payload;
pub mod reconciler;
pub mod sink;
pub mod store;

pub use cache::IdentifierCache;
pub use client::StoreClient;
pub use error::{Result, StoreError};
pub use frost::FrostStore;
pub use mock_store::{MockFailure, MockStore, MockStoreConfig, StoreCall};
pub use payload::creation_body;
pub use reconciler::{ReconcileReport, ReconciledEntity, Reconciler};
pub use sink::StoreSink;
pub use store::RemoteStore;
