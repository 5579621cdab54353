//! Remote entity store abstraction
//!
//! Transport seam between the store client and an HTTP entity API, so the
//! reconciler and the observation sink run unchanged against the in-memory mock.

use std::future::Future;

use contracts::{EntityKind, RemoteId};
use serde_json::Value;

use crate::error::Result;

/// Remote entity store trait
pub trait RemoteStore: Send + Sync {
    /// Service root, used in log lines and error messages
    fn endpoint(&self) -> &str;

    /// Query a collection by exact name
    ///
    /// # Returns
    /// The remote id of the first match, `None` when nothing matches
    fn find_by_name(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> impl Future<Output = Result<Option<RemoteId>>> + Send;

    /// Create an entity from a complete creation body
    ///
    /// Not idempotent: callers look the name up first.
    fn create(&self, kind: EntityKind, body: &Value)
        -> impl Future<Output = Result<RemoteId>> + Send;

    /// Create one observation bound to `datastream`
    ///
    /// `body` carries phenomenonTime / result / resultTime; the store adds the
    /// Datastream reference.
    fn create_observation(
        &self,
        datastream: &RemoteId,
        body: &Value,
    ) -> impl Future<Output = Result<RemoteId>> + Send;

    /// Cheap authenticated round-trip to verify reachability
    fn check_connection(&self) -> impl Future<Output = Result<()>> + Send;
}
