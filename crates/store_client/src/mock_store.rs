//! Mock entity store
//!
//! In-memory `RemoteStore` for unit and end-to-end tests, with a call log and
//! injectable failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{EntityKind, RemoteId};
use serde_json::Value;
use tracing::instrument;

use crate::error::{Result, StoreError};
use crate::store::RemoteStore;

/// One recorded store call
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Find { kind: EntityKind, name: String },
    Create { kind: EntityKind, name: String },
    Observation { datastream: RemoteId },
    CheckConnection,
}

/// A failure to inject
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Retryable failure
    Unavailable,
    /// Non-retryable failure with a status code
    Rejected(u16),
    /// Sleep before answering, to exercise client-side timeouts
    Delay(Duration),
}

/// Mock store configuration
#[derive(Debug, Default, Clone)]
pub struct MockStoreConfig {
    /// Creations of these names fail with `Rejected(400)`
    pub reject_names: Vec<String>,
    /// Connection check fails
    pub unreachable: bool,
}

/// Mock remote store
pub struct MockStore {
    config: MockStoreConfig,
    next_id: AtomicI64,
    /// (kind, name) -> id
    entities: Mutex<HashMap<(EntityKind, String), RemoteId>>,
    /// (datastream id, body)
    observations: Mutex<Vec<(RemoteId, Value)>>,
    calls: Mutex<Vec<StoreCall>>,
    /// Consumed one per call, before the call is handled
    scripted_failures: Mutex<VecDeque<Option<MockFailure>>>,
    /// Consumed one per observation submission
    observation_failures: Mutex<VecDeque<Option<MockFailure>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::with_config(MockStoreConfig::default())
    }

    pub fn with_config(config: MockStoreConfig) -> Self {
        Self {
            config,
            next_id: AtomicI64::new(1),
            entities: Mutex::new(HashMap::new()),
            observations: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            observation_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Pre-populate an entity, as if another process had created it
    pub fn seed(&self, kind: EntityKind, name: &str, id: RemoteId) {
        lock(&self.entities).insert((kind, name.to_string()), id);
    }

    /// Script the outcome of upcoming entity calls; `None` means answer normally
    pub fn script_failures(&self, failures: impl IntoIterator<Item = Option<MockFailure>>) {
        lock(&self.scripted_failures).extend(failures);
    }

    /// Script the outcome of upcoming observation submissions
    pub fn script_observation_failures(
        &self,
        failures: impl IntoIterator<Item = Option<MockFailure>>,
    ) {
        lock(&self.observation_failures).extend(failures);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Entity creations in call order
    pub fn creations(&self) -> Vec<(EntityKind, String)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                StoreCall::Create { kind, name } => Some((*kind, name.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn creation_count(&self) -> usize {
        self.creations().len()
    }

    pub fn entity_count(&self) -> usize {
        lock(&self.entities).len()
    }

    pub fn id_of(&self, kind: EntityKind, name: &str) -> Option<RemoteId> {
        lock(&self.entities).get(&(kind, name.to_string())).cloned()
    }

    /// Accepted observations, in submission order
    pub fn observations(&self) -> Vec<(RemoteId, Value)> {
        lock(&self.observations).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }

    fn allocate_id(&self) -> RemoteId {
        RemoteId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn apply(
        failures: &Mutex<VecDeque<Option<MockFailure>>>,
        operation: &str,
    ) -> Result<()> {
        let next = lock(failures).pop_front().flatten();
        match next {
            None => Ok(()),
            Some(MockFailure::Unavailable) => {
                Err(StoreError::unavailable(operation, "mock unavailable"))
            }
            Some(MockFailure::Rejected(status)) => Err(StoreError::rejected(
                operation,
                Some(status),
                "mock rejection",
            )),
            Some(MockFailure::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MockStore {
    fn endpoint(&self) -> &str {
        "mock://store"
    }

    #[instrument(name = "mock_store_find", skip(self), fields(kind = %kind, name = %name))]
    async fn find_by_name(&self, kind: EntityKind, name: &str) -> Result<Option<RemoteId>> {
        self.record(StoreCall::Find {
            kind,
            name: name.to_string(),
        });
        Self::apply(&self.scripted_failures, "find").await?;
        Ok(self.id_of(kind, name))
    }

    #[instrument(name = "mock_store_create", skip(self, body), fields(kind = %kind))]
    async fn create(&self, kind: EntityKind, body: &Value) -> Result<RemoteId> {
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.record(StoreCall::Create {
            kind,
            name: name.clone(),
        });
        Self::apply(&self.scripted_failures, "create").await?;

        if self.config.reject_names.contains(&name) {
            return Err(StoreError::rejected(
                format!("create {kind}"),
                Some(400),
                "mock rejection",
            ));
        }

        let id = self.allocate_id();
        lock(&self.entities).insert((kind, name), id.clone());
        Ok(id)
    }

    #[instrument(
        name = "mock_store_create_observation",
        skip(self, body),
        fields(datastream = %datastream)
    )]
    async fn create_observation(&self, datastream: &RemoteId, body: &Value) -> Result<RemoteId> {
        self.record(StoreCall::Observation {
            datastream: datastream.clone(),
        });
        Self::apply(&self.observation_failures, "create Observation").await?;

        let id = self.allocate_id();
        lock(&self.observations).push((datastream.clone(), body.clone()));
        Ok(id)
    }

    async fn check_connection(&self) -> Result<()> {
        self.record(StoreCall::CheckConnection);
        if self.config.unreachable {
            return Err(StoreError::unavailable(
                "connection check",
                "mock store unreachable",
            ));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
