//! Transform mapper - vendor-native fields to canonical observations
//!
//! Each supported model has a static table from native field id to canonical
//! stream name. Native ids are matched ASCII case-insensitively, since vendors
//! are not consistent about capitalisation across firmware versions.

use chrono::Utc;
use contracts::{EntityName, Observation, ReadingBatch, SensorModel};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Per-field value conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTransform {
    /// Pass the raw value through
    Identity,
    /// Motion flag: `"trigger"` is `true`, anything else `false`
    Trigger,
}

impl ValueTransform {
    pub fn apply(&self, raw: &Value) -> Value {
        match self {
            Self::Identity => raw.clone(),
            Self::Trigger => {
                Value::Bool(raw.as_str().is_some_and(|s| s.eq_ignore_ascii_case("trigger")))
            }
        }
    }
}

/// One native field to one canonical stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub native: &'static str,
    pub stream: &'static str,
    pub transform: ValueTransform,
}

const fn map(native: &'static str, stream: &'static str) -> FieldMapping {
    FieldMapping {
        native,
        stream,
        transform: ValueTransform::Identity,
    }
}

/// Static mapping table of one sensor model
#[derive(Debug, PartialEq, Eq)]
pub struct ModelTable {
    pub model: SensorModel,
    pub fields: &'static [FieldMapping],
    /// Known vendor metadata, skipped without error
    pub ignored: &'static [&'static str],
}

pub static NETATMO_NWS03: ModelTable = ModelTable {
    model: SensorModel::NetatmoNws03,
    fields: &[
        map("Temperature", "temperature_indoor"),
        map("CO2", "co2"),
        map("Humidity", "humidity"),
        map("Noise", "noise"),
        map("Pressure", "gauge_pressure"),
        map("AbsolutePressure", "absolute_pressure"),
    ],
    ignored: &[
        "time_utc",
        "temp_trend",
        "pressure_trend",
        "min_temp",
        "max_temp",
        "date_min_temp",
        "date_max_temp",
        "health_idx",
    ],
};

pub static MILESIGHT_AM308L: ModelTable = ModelTable {
    model: SensorModel::MilesightAm308l,
    fields: &[
        map("battery", "battery_level"),
        map("co2", "co2"),
        map("humidity", "humidity"),
        map("light_level", "light_level"),
        FieldMapping {
            native: "pir",
            stream: "passive_infrared",
            transform: ValueTransform::Trigger,
        },
        map("pm10", "particulate_matter_10"),
        map("pm2_5", "particulate_matter_2_5"),
        map("pressure", "gauge_pressure"),
        map("temperature", "temperature_indoor"),
        map("tvoc", "total_volatile_organic_compounds"),
    ],
    ignored: &[],
};

pub static MILESIGHT_AM103L: ModelTable = ModelTable {
    model: SensorModel::MilesightAm103l,
    fields: &[
        map("battery", "battery_level"),
        map("co2", "co2"),
        map("humidity", "humidity"),
        map("temperature", "temperature_indoor"),
    ],
    ignored: &[],
};

impl ModelTable {
    pub fn for_model(model: SensorModel) -> &'static ModelTable {
        match model {
            SensorModel::NetatmoNws03 => &NETATMO_NWS03,
            SensorModel::MilesightAm308l => &MILESIGHT_AM308L,
            SensorModel::MilesightAm103l => &MILESIGHT_AM103L,
        }
    }

    pub fn lookup(&self, native: &str) -> Option<&FieldMapping> {
        self.fields
            .iter()
            .find(|m| m.native.eq_ignore_ascii_case(native))
    }

    pub fn is_ignored(&self, native: &str) -> bool {
        self.ignored.iter().any(|i| i.eq_ignore_ascii_case(native))
    }

    /// Canonical streams this model can produce
    pub fn streams(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|m| m.stream)
    }

    pub fn produces(&self, stream: &str) -> bool {
        self.fields.iter().any(|m| m.stream == stream)
    }
}

/// Why a native field produced no observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldIssue {
    /// No table entry
    Unmapped,
    /// Another spelling of a field already taken from the same batch
    Duplicate,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unmapped => "unmapped",
            Self::Duplicate => "duplicate",
        })
    }
}

/// A native field that was not turned into an observation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sensor '{sensor}' ({model}) reported {issue} field '{field}'")]
pub struct TransformMappingError {
    pub sensor: EntityName,
    pub model: SensorModel,
    pub field: String,
    pub issue: FieldIssue,
}

/// Partial transform result
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub observations: Vec<Observation>,
    pub errors: Vec<TransformMappingError>,
}

impl TransformOutput {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Maps reading batches of one model to observations
#[derive(Debug, Clone, Copy)]
pub struct TransformMapper {
    table: &'static ModelTable,
}

impl TransformMapper {
    pub fn for_model(model: SensorModel) -> Self {
        Self::with_table(ModelTable::for_model(model))
    }

    pub fn with_table(table: &'static ModelTable) -> Self {
        Self { table }
    }

    pub fn model(&self) -> SensorModel {
        self.table.model
    }

    pub fn table(&self) -> &'static ModelTable {
        self.table
    }

    /// Transform one batch.
    ///
    /// Unknown fields are reported without discarding their siblings; null
    /// values are absent readings. Observations follow table order.
    ///
    /// When one batch carries a field under several spellings (`co2` and
    /// `CO2`) the first in byte order is used and every other spelling is
    /// reported as a duplicate.
    pub fn transform(&self, sensor: &EntityName, batch: &ReadingBatch) -> TransformOutput {
        let now = Utc::now();
        let phenomenon_time = batch.phenomenon_time.unwrap_or(now);
        let mut output = TransformOutput::default();
        let mut taken: Vec<&str> = Vec::with_capacity(self.table.fields.len());

        for mapping in self.table.fields {
            let Some((native, value)) = batch
                .fields
                .iter()
                .find(|(native, _)| mapping.native.eq_ignore_ascii_case(native))
            else {
                continue;
            };
            taken.push(native);
            if value.is_null() {
                continue;
            }
            output.observations.push(Observation {
                sensor: sensor.clone(),
                stream: mapping.stream.to_string(),
                phenomenon_time,
                result: mapping.transform.apply(value),
                result_time: Some(now),
            });
        }

        for native in batch.fields.keys() {
            let issue = if taken.contains(&native.as_str()) || self.table.is_ignored(native) {
                continue;
            } else if self.table.lookup(native).is_some() {
                FieldIssue::Duplicate
            } else {
                FieldIssue::Unmapped
            };
            output.errors.push(TransformMappingError {
                sensor: sensor.clone(),
                model: self.table.model,
                field: native.clone(),
                issue,
            });
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    static TEMPERATURE_ONLY: ModelTable = ModelTable {
        model: SensorModel::NetatmoNws03,
        fields: &[map("Temperature", "temperature_indoor")],
        ignored: &[],
    };

    #[test]
    fn test_unknown_field_keeps_siblings() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let batch = ReadingBatch::new("s1")
            .at(t)
            .with_field("Temperature", 21.4)
            .with_field("Pressure", 1012);
        let output = TransformMapper::with_table(&TEMPERATURE_ONLY).transform(&"s1".into(), &batch);

        assert_eq!(output.observations.len(), 1);
        assert_eq!(output.observations[0].stream, "temperature_indoor");
        assert_eq!(output.observations[0].result, json!(21.4));
        assert_eq!(output.observations[0].phenomenon_time, t);
        assert_eq!(
            output.errors,
            vec![TransformMappingError {
                sensor: "s1".into(),
                model: SensorModel::NetatmoNws03,
                field: "Pressure".into(),
                issue: FieldIssue::Unmapped,
            }]
        );
    }

    #[test]
    fn test_netatmo_dashboard() {
        let batch = ReadingBatch::new("70:ee:50:aa:bb:cc")
            .with_field("Temperature", 22.1)
            .with_field("CO2", 612)
            .with_field("Humidity", 41)
            .with_field("Noise", 38)
            .with_field("Pressure", 1015.2)
            .with_field("AbsolutePressure", 1013.9)
            .with_field("temp_trend", "stable")
            .with_field("health_idx", 1);
        let output = TransformMapper::for_model(SensorModel::NetatmoNws03)
            .transform(&"70:ee:50:aa:bb:cc".into(), &batch);

        assert!(output.is_clean(), "{:?}", output.errors);
        let streams: Vec<_> = output.observations.iter().map(|o| o.stream.as_str()).collect();
        assert_eq!(
            streams,
            vec![
                "temperature_indoor",
                "co2",
                "humidity",
                "noise",
                "gauge_pressure",
                "absolute_pressure"
            ]
        );
    }

    #[test]
    fn test_native_ids_case_insensitive() {
        let batch = ReadingBatch::new("s1").with_field("TEMPERATURE", 20.0);
        let output = TransformMapper::for_model(SensorModel::MilesightAm103l)
            .transform(&"s1".into(), &batch);
        assert!(output.is_clean());
        assert_eq!(output.observations[0].stream, "temperature_indoor");
    }

    #[test]
    fn test_case_variants_of_one_field_reported() {
        let batch = ReadingBatch::new("s1")
            .with_field("co2", 640)
            .with_field("CO2", 655)
            .with_field("humidity", 48);
        let output = TransformMapper::for_model(SensorModel::MilesightAm103l)
            .transform(&"s1".into(), &batch);

        let co2: Vec<_> = output.observations.iter().filter(|o| o.stream == "co2").collect();
        assert_eq!(co2.len(), 1);
        assert_eq!(co2[0].result, json!(655));
        assert_eq!(output.observations.len(), 2);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].field, "co2");
        assert_eq!(output.errors[0].issue, FieldIssue::Duplicate);
        assert_eq!(
            output.errors[0].to_string(),
            "sensor 's1' (milesight.am103l) reported duplicate field 'co2'"
        );
    }

    #[test]
    fn test_pir_trigger() {
        let mapper = TransformMapper::for_model(SensorModel::MilesightAm308l);
        let triggered = ReadingBatch::new("am308").with_field("pir", "trigger");
        let idle = ReadingBatch::new("am308").with_field("pir", "idle");

        let out = mapper.transform(&"am308".into(), &triggered);
        assert_eq!(out.observations[0].stream, "passive_infrared");
        assert_eq!(out.observations[0].result, json!(true));
        let out = mapper.transform(&"am308".into(), &idle);
        assert_eq!(out.observations[0].result, json!(false));
    }

    #[test]
    fn test_null_is_absent_and_time_defaults() {
        let before = Utc::now();
        let batch = ReadingBatch::new("s1")
            .with_field("co2", Value::Null)
            .with_field("humidity", 55);
        let output = TransformMapper::for_model(SensorModel::MilesightAm103l)
            .transform(&"s1".into(), &batch);

        assert_eq!(output.observations.len(), 1);
        assert_eq!(output.observations[0].stream, "humidity");
        assert!(output.observations[0].phenomenon_time >= before);
    }

    #[test]
    fn test_table_streams() {
        let table = ModelTable::for_model(SensorModel::MilesightAm308l);
        assert_eq!(table.streams().count(), 10);
        assert!(table.produces("particulate_matter_2_5"));
        assert!(!table.produces("noise"));
        assert!(NETATMO_NWS03.is_ignored("TIME_UTC"));
    }
}
