//! ObservationSink trait - where sensor tasks submit observations
//!
//! Implemented by the store client; mocked in scheduler tests.

use crate::{EntityName, Observation, RemoteId, SubmitError};

/// Observation output trait
#[trait_variant::make(ObservationSink: Send)]
pub trait LocalObservationSink {
    /// Resolve a Datastream name to its remote identity.
    ///
    /// Served from the identifier cache; a miss falls back to a guarded
    /// lookup-or-create for that single Datastream.
    async fn resolve_datastream(&self, name: &EntityName) -> Result<RemoteId, SubmitError>;

    /// Submit one observation to a resolved Datastream
    ///
    /// # Errors
    /// `Unavailable` is retryable, `Rejected` is not
    async fn submit(
        &self,
        datastream: &RemoteId,
        observation: &Observation,
    ) -> Result<RemoteId, SubmitError>;
}
