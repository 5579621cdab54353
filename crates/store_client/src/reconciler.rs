//! Reconciler
//!
//! Walks the merged graph in dependency order and creates whatever the store
//! does not have yet. Existing entities are accepted as they are: attributes
//! are never compared or updated. Any failure aborts the whole run, so
//! streaming never starts on a partial topology.

use std::future::Future;
use std::time::{Duration, Instant};

use contracts::{Entity, EntityGraph, EntityKind, EntityName, RemoteId, StoreSettings};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::client::StoreClient;
use crate::error::{Result, StoreError};
use crate::payload::creation_body;
use crate::store::RemoteStore;

/// One reconciled entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledEntity {
    pub kind: EntityKind,
    pub name: EntityName,
    pub id: RemoteId,
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Entities created by this run, in creation order
    pub created: Vec<ReconciledEntity>,
    /// Entities the store already had
    pub existing: Vec<ReconciledEntity>,
    pub duration: Duration,
}

impl ReconcileReport {
    pub fn created_count(&self, kind: EntityKind) -> usize {
        self.created.iter().filter(|e| e.kind == kind).count()
    }

    pub fn existing_count(&self, kind: EntityKind) -> usize {
        self.existing.iter().filter(|e| e.kind == kind).count()
    }

    pub fn total(&self) -> usize {
        self.created.len() + self.existing.len()
    }
}

enum Resolution {
    Created,
    Existing,
}

/// Reconciler
pub struct Reconciler<'a, S: RemoteStore> {
    client: &'a StoreClient<S>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<'a, S: RemoteStore> Reconciler<'a, S> {
    pub fn new(client: &'a StoreClient<S>) -> Self {
        let defaults = StoreSettings::default();
        Self {
            client,
            max_attempts: defaults.reconcile_max_attempts,
            retry_delay: defaults.reconcile_retry_delay(),
        }
    }

    /// Retry policy for `RemoteUnavailable`; other errors are never retried
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_settings(self, settings: &StoreSettings) -> Self {
        self.with_retry(
            settings.reconcile_max_attempts,
            settings.reconcile_retry_delay(),
        )
    }

    /// Make the store contain every entity of `graph`
    ///
    /// # Ordering
    /// ObservedProperties and Locations, then Things and Sensors, then
    /// Datastreams, so each creation payload can embed its dependencies' ids.
    ///
    /// # Errors
    /// The first entity that cannot be resolved aborts the run with
    /// `EntityFailed`, naming the entity and its declaring documents.
    #[instrument(
        name = "reconcile",
        skip(self, graph),
        fields(entities = graph.len(), endpoint = %self.client.endpoint())
    )]
    pub async fn reconcile(&self, graph: &EntityGraph) -> Result<ReconcileReport> {
        let started = Instant::now();

        self.retrying("connection check", || self.client.check_connection())
            .await
            .inspect_err(|e| {
                error!(endpoint = %self.client.endpoint(), error = %e, "entity store unreachable");
            })?;

        let mut report = ReconcileReport::default();
        for entity in graph.in_dependency_order() {
            let kind = entity.kind();
            let name = entity.name();
            match self.reconcile_entity(entity).await {
                Ok((id, Resolution::Created)) => {
                    metrics::counter!("sta_ingest_entities_created_total", "kind" => kind.as_str())
                        .increment(1);
                    report.created.push(ReconciledEntity {
                        kind,
                        name: name.clone(),
                        id,
                    });
                }
                Ok((id, Resolution::Existing)) => {
                    metrics::counter!("sta_ingest_entities_existing_total", "kind" => kind.as_str())
                        .increment(1);
                    report.existing.push(ReconciledEntity {
                        kind,
                        name: name.clone(),
                        id,
                    });
                }
                Err(e) => {
                    let documents = graph.sources(kind, name).join(", ");
                    error!(
                        kind = %kind,
                        name = %name,
                        documents = %documents,
                        error = %e,
                        "reconciliation aborted"
                    );
                    return Err(StoreError::EntityFailed {
                        kind,
                        name: name.clone(),
                        documents,
                        source: Box::new(e),
                    });
                }
            }
        }

        report.duration = started.elapsed();
        info!(
            created = report.created.len(),
            existing = report.existing.len(),
            duration_ms = report.duration.as_millis() as u64,
            "reconciliation completed"
        );
        Ok(report)
    }

    #[instrument(
        name = "reconcile_entity",
        skip(self, entity),
        fields(kind = %entity.kind(), name = %entity.name())
    )]
    async fn reconcile_entity(&self, entity: &Entity) -> Result<(RemoteId, Resolution)> {
        let kind = entity.kind();
        let name = entity.name();

        let found = self
            .retrying("find", || self.client.find_by_name(kind, name))
            .await?;
        if let Some(id) = found {
            debug!(id = %id, "accepting existing remote identity");
            return Ok((id, Resolution::Existing));
        }

        let body = creation_body(entity, self.client.cache())?;
        let id = self
            .retrying("create", || self.client.create(kind, name, &body))
            .await?;
        Ok((id, Resolution::Created))
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        error = %e,
                        "entity store unavailable, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
