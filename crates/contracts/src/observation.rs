//! Reading and observation types
//!
//! Upstream adapters produce `ReadingBatch`es keyed by vendor-native field;
//! the transform step turns them into canonical `Observation`s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EntityName;

/// A raw vendor value (number, bool or string as delivered)
pub type RawReading = Value;

/// One upstream delivery for one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingBatch {
    pub sensor: EntityName,
    /// Upstream measurement time, when the vendor reports one
    pub phenomenon_time: Option<DateTime<Utc>>,
    /// Native field id to raw value
    pub fields: BTreeMap<String, RawReading>,
}

impl ReadingBatch {
    pub fn new(sensor: impl Into<EntityName>) -> Self {
        Self {
            sensor: sensor.into(),
            phenomenon_time: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.phenomenon_time = Some(time);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<RawReading>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A normalized observation, immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sensor: EntityName,
    /// Canonical stream name (e.g. `temperature_indoor`)
    pub stream: String,
    pub phenomenon_time: DateTime<Utc>,
    pub result: Value,
    pub result_time: Option<DateTime<Utc>>,
}

impl Observation {
    /// Creation payload body, without the Datastream reference
    pub fn to_payload(&self) -> Value {
        let mut body = serde_json::json!({
            "phenomenonTime": self.phenomenon_time.to_rfc3339(),
            "result": self.result,
        });
        if let (Some(t), Some(map)) = (self.result_time, body.as_object_mut()) {
            map.insert("resultTime".into(), Value::String(t.to_rfc3339()));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_batch_builder() {
        let batch = ReadingBatch::new("s1")
            .with_field("Temperature", 21.4)
            .with_field("Pressure", 1012);
        assert_eq!(batch.fields.len(), 2);
        assert_eq!(batch.fields["Temperature"], json!(21.4));
        assert!(batch.phenomenon_time.is_none());
    }

    #[test]
    fn test_payload_shape() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let obs = Observation {
            sensor: "s1".into(),
            stream: "co2".into(),
            phenomenon_time: t,
            result: json!(415),
            result_time: None,
        };
        assert_eq!(
            obs.to_payload(),
            json!({"phenomenonTime": "2025-03-01T12:00:00+00:00", "result": 415})
        );

        let with_result_time = Observation {
            result_time: Some(t),
            ..obs
        };
        assert!(with_result_time.to_payload().get("resultTime").is_some());
    }
}
