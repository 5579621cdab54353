//! StoreClient - timeouts and identifier caching over a `RemoteStore`

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use contracts::{EntityKind, EntityName, RemoteId};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::cache::IdentifierCache;
use crate::error::{Result, StoreError};
use crate::store::RemoteStore;

/// Store client
///
/// Every call is bounded by `timeout`; a timeout surfaces as
/// `RemoteUnavailable`. Successful lookups and creations populate the cache.
pub struct StoreClient<S: RemoteStore> {
    store: S,
    cache: IdentifierCache,
    timeout: Duration,
    /// Per-entity guards for lookup-or-create; never a global lock
    entity_locks: DashMap<(EntityKind, EntityName), Arc<Mutex<()>>>,
}

impl<S: RemoteStore> StoreClient<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self {
            store,
            cache: IdentifierCache::new(),
            timeout,
            entity_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &IdentifierCache {
        &self.cache
    }

    pub fn endpoint(&self) -> &str {
        self.store.endpoint()
    }

    /// Cached remote id, without any network call
    pub fn cached(&self, kind: EntityKind, name: &str) -> Option<RemoteId> {
        self.cache.get(kind, name)
    }

    /// Look an entity up by name, caching a hit
    #[instrument(name = "store_find_by_name", skip(self), fields(kind = %kind, name = %name))]
    pub async fn find_by_name(
        &self,
        kind: EntityKind,
        name: &EntityName,
    ) -> Result<Option<RemoteId>> {
        let found = self
            .bounded("find", self.store.find_by_name(kind, name))
            .await?;
        if let Some(id) = &found {
            self.cache.insert(kind, name, id.clone());
        }
        Ok(found)
    }

    /// Create an entity and cache its id
    ///
    /// Callers look the name up first; this does not deduplicate.
    #[instrument(name = "store_create", skip(self, body), fields(kind = %kind, name = %name))]
    pub async fn create(
        &self,
        kind: EntityKind,
        name: &EntityName,
        body: &Value,
    ) -> Result<RemoteId> {
        let id = self.bounded("create", self.store.create(kind, body)).await?;
        self.cache.insert(kind, name, id.clone());
        info!(kind = %kind, name = %name, id = %id, "entity created");
        Ok(id)
    }

    /// Submit one observation body to a resolved Datastream
    pub async fn create_observation(
        &self,
        datastream: &RemoteId,
        body: &Value,
    ) -> Result<RemoteId> {
        self.bounded(
            "create Observation",
            self.store.create_observation(datastream, body),
        )
        .await
    }

    pub async fn check_connection(&self) -> Result<()> {
        self.bounded("connection check", self.store.check_connection())
            .await
    }

    /// Resolve `(kind, name)`, creating it when the store has no match.
    ///
    /// Serialized per entity: concurrent callers for the same name wait on one
    /// guard and the later ones are served from the cache.
    #[instrument(
        name = "store_lookup_or_create",
        skip(self, build_body),
        fields(kind = %kind, name = %name)
    )]
    pub async fn lookup_or_create<F>(
        &self,
        kind: EntityKind,
        name: &EntityName,
        build_body: F,
    ) -> Result<RemoteId>
    where
        F: FnOnce(&IdentifierCache) -> Result<Value> + Send,
    {
        if let Some(id) = self.cache.get(kind, name) {
            debug!("cache hit");
            return Ok(id);
        }

        let guard = self
            .entity_locks
            .entry((kind, name.clone()))
            .or_default()
            .clone();
        let _held = guard.lock().await;

        if let Some(id) = self.cache.get(kind, name) {
            debug!("resolved by a concurrent caller");
            return Ok(id);
        }
        if let Some(id) = self.find_by_name(kind, name).await? {
            return Ok(id);
        }
        let body = build_body(&self.cache)?;
        self.create(kind, name, &body).await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::unavailable(
                operation,
                format!("no response within {}ms", self.timeout.as_millis()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_store::{MockFailure, MockStore, StoreCall};
    use serde_json::json;

    fn client() -> StoreClient<MockStore> {
        StoreClient::new(MockStore::new(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_find_populates_cache() {
        let client = client();
        client
            .store()
            .seed(EntityKind::Thing, "Desk", RemoteId::Number(5));

        let found = client
            .find_by_name(EntityKind::Thing, &"Desk".into())
            .await
            .unwrap();
        assert_eq!(found, Some(RemoteId::Number(5)));
        assert_eq!(client.cached(EntityKind::Thing, "Desk"), Some(RemoteId::Number(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unavailable() {
        let client = client();
        client
            .store()
            .script_failures([Some(MockFailure::Delay(Duration::from_secs(5)))]);

        let err = client
            .find_by_name(EntityKind::Sensor, &"s1".into())
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[tokio::test]
    async fn test_lookup_or_create_serializes_per_entity() {
        let client = Arc::new(client());
        let name: EntityName = "s1_co2".into();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                let name = name.clone();
                tokio::spawn(async move {
                    client
                        .lookup_or_create(EntityKind::Datastream, &name, |_| {
                            Ok(json!({"name": "s1_co2"}))
                        })
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(client.store().creation_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_or_create_prefers_existing() {
        let client = client();
        client
            .store()
            .seed(EntityKind::ObservedProperty, "co2", RemoteId::Number(3));

        let id = client
            .lookup_or_create(EntityKind::ObservedProperty, &"co2".into(), |_| {
                panic!("must not build a body for an existing entity")
            })
            .await
            .unwrap();
        assert_eq!(id, RemoteId::Number(3));
        assert!(!client
            .store()
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::Create { .. })));
    }
}
