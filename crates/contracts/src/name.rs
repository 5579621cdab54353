//! Entity names
//!
//! A SensorThings entity is identified locally by its `name` property. The
//! same name keys the entity graph, the remote-identity cache, scheduler
//! routes and the `sensor` label on every metric, and it is what the store is
//! queried by when an identity has to be recovered.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Name of a Thing, Location, Sensor, ObservedProperty or Datastream.
///
/// Shared behind an `Arc<str>`; a graph of a few hundred entities hands the
/// same allocation to the cache, the routes and every log span.
///
/// # Examples
/// ```
/// use contracts::EntityName;
///
/// let room: EntityName = " Room120 ".trim().into();
/// assert_eq!(room, "Room120");
/// assert_eq!(room.name_filter(), "name eq 'Room120'");
/// ```
#[derive(Clone, Default)]
pub struct EntityName(Arc<str>);

impl EntityName {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// OData `$filter` selecting the store entity with this name
    pub fn name_filter(&self) -> String {
        name_filter(&self.0)
    }
}

/// `name eq '<name>'` with single quotes doubled, as OData string literals
/// require
pub fn name_filter(name: &str) -> String {
    format!("name eq '{}'", name.replace('\'', "''"))
}

impl Deref for EntityName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EntityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Graph maps are keyed by EntityName but looked up with the &str found in
// documents and payloads.
impl Borrow<str> for EntityName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EntityName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&String> for EntityName {
    fn from(name: &String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl PartialEq for EntityName {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for EntityName {}

impl PartialEq<str> for EntityName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for EntityName {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl PartialEq<String> for EntityName {
    fn eq(&self, other: &String) -> bool {
        &*self.0 == other.as_str()
    }
}

// Must agree with `str` for the Borrow lookups above.
impl PartialOrd for EntityName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for EntityName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl Serialize for EntityName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityName {
    /// Sensor documents are hand-written YAML; surrounding whitespace is not
    /// part of the name.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.trim()))
    }
}
