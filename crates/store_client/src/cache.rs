//! Identifier cache
//!
//! `(kind, name) -> RemoteId`. Reads load an immutable snapshot and never
//! block; writes copy the map and swap it in. Writes happen while reconciling,
//! before any sensor task starts, plus the rare guarded lookup-or-create.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use contracts::{EntityKind, EntityName, RemoteId};

type Snapshot = HashMap<EntityKind, HashMap<EntityName, RemoteId>>;

pub struct IdentifierCache {
    map: ArcSwap<Snapshot>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self {
            map: ArcSwap::from_pointee(Snapshot::new()),
        }
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<RemoteId> {
        self.map
            .load()
            .get(&kind)
            .and_then(|names| names.get(name))
            .cloned()
    }

    pub fn contains(&self, kind: EntityKind, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    pub fn insert(&self, kind: EntityKind, name: &EntityName, id: RemoteId) {
        self.map.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.entry(kind)
                .or_default()
                .insert(name.clone(), id.clone());
            next
        });
    }

    /// Number of cached identifiers across all kinds
    pub fn len(&self) -> usize {
        self.map.load().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.map.load_full()
    }
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdentifierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierCache")
            .field("entries", &self.len())
            .finish()
    }
}
