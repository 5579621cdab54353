//! RemoteId - identity assigned by the remote entity store

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Opaque identifier assigned by the entity store on creation.
///
/// SensorThings servers may be configured with numeric or string ids, so both
/// are carried. Serializes as the bare JSON value used in `{"@iot.id": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(i64),
    Text(String),
}

impl RemoteId {
    /// Read an `@iot.id` value out of a JSON entity.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) if !s.is_empty() => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Parse the key segment of an entity URL, e.g. `42` or `'abc'`.
    pub fn parse_key(segment: &str) -> Option<Self> {
        let segment = segment.trim();
        if segment.is_empty() {
            return None;
        }
        if let Some(inner) = segment
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
        {
            return Some(Self::Text(inner.replace("''", "'")));
        }
        segment.parse::<i64>().ok().map(Self::Number)
    }

    /// Key segment form used in entity URLs: `42` or `'abc'`.
    pub fn to_key(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    /// `{"@iot.id": <id>}` reference object for creation payloads.
    pub fn as_reference(&self) -> Value {
        json!({ "@iot.id": self })
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RemoteId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}
