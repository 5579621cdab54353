//! StoreSink - the scheduler's view of the entity store

use std::sync::Arc;

use contracts::{
    Entity, EntityGraph, EntityKind, EntityName, Observation, ObservationSink, RemoteId,
    SubmitError,
};
use tracing::{debug, instrument, warn};

use crate::client::StoreClient;
use crate::payload::creation_body;
use crate::store::RemoteStore;

/// Observation sink backed by a `StoreClient`
///
/// Datastream ids come from the identifier cache filled by reconciliation.
/// A miss falls back to a guarded lookup-or-create of that Datastream and its
/// dependencies, built from the merged graph.
pub struct StoreSink<S: RemoteStore> {
    client: Arc<StoreClient<S>>,
    graph: Arc<EntityGraph>,
}

impl<S: RemoteStore> StoreSink<S> {
    pub fn new(client: Arc<StoreClient<S>>, graph: Arc<EntityGraph>) -> Self {
        Self { client, graph }
    }

    pub fn client(&self) -> &Arc<StoreClient<S>> {
        &self.client
    }

    /// Entities a Datastream needs, dependencies first
    fn resolution_chain(&self, name: &str) -> Result<Vec<Entity>, SubmitError> {
        let ds = self.graph.datastream(name).ok_or_else(|| {
            SubmitError::rejected(None, format!("Datastream '{name}' is not declared"))
        })?;

        let mut chain = Vec::new();
        if let Some(thing) = ds.thing().and_then(|t| self.graph.thing(t)) {
            for location in &thing.links.locations {
                if let Some(entity) = self.graph.get(EntityKind::Location, location) {
                    chain.push(entity.clone());
                }
            }
            chain.push(Entity::Thing(thing.clone()));
        }
        for (kind, target) in [
            (EntityKind::Sensor, ds.sensor()),
            (EntityKind::ObservedProperty, ds.observed_property()),
        ] {
            if let Some(entity) = target.and_then(|t| self.graph.get(kind, t)) {
                chain.push(entity.clone());
            }
        }
        chain.push(Entity::Datastream(ds.clone()));
        Ok(chain)
    }
}

impl<S: RemoteStore> ObservationSink for StoreSink<S> {
    #[instrument(name = "sink_resolve_datastream", skip(self), fields(datastream = %name))]
    async fn resolve_datastream(&self, name: &EntityName) -> Result<RemoteId, SubmitError> {
        if let Some(id) = self.client.cached(EntityKind::Datastream, name) {
            return Ok(id);
        }

        warn!("Datastream missing from identifier cache, resolving on demand");
        let mut resolved = None;
        for entity in self.resolution_chain(name)? {
            let id = self
                .client
                .lookup_or_create(entity.kind(), entity.name(), |cache| {
                    creation_body(&entity, cache)
                })
                .await?;
            resolved = Some(id);
        }
        resolved.ok_or_else(|| SubmitError::rejected(None, "empty resolution chain"))
    }

    #[instrument(
        name = "sink_submit",
        skip(self, observation),
        fields(datastream = %datastream, sensor = %observation.sensor, stream = %observation.stream)
    )]
    async fn submit(
        &self,
        datastream: &RemoteId,
        observation: &Observation,
    ) -> Result<RemoteId, SubmitError> {
        let id = self
            .client
            .create_observation(datastream, &observation.to_payload())
            .await?;
        debug!(id = %id, "observation created");
        Ok(id)
    }
}
