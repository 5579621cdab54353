//! Sensor document schema
//!
//! One document per physical sensor, with five entity sections keyed by name
//! plus the network metadata that selects how the sensor is read.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Datastream, Entity, EntityName, Location, ObservedProperty, Sensor, Thing};

/// Upstream host value selecting the Netatmo cloud API
pub const NETATMO_HOST: &str = "netatmo";

/// Host suffix of The Things Stack community/cloud brokers
pub const TTS_HOST_SUFFIX: &str = ".thethings.network";

/// Supported sensor models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorModel {
    #[serde(rename = "netatmo.nws03")]
    NetatmoNws03,
    #[serde(rename = "milesight.am308l")]
    MilesightAm308l,
    #[serde(rename = "milesight.am103l")]
    MilesightAm103l,
}

/// How a model's readings reach the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportShape {
    /// Pulled on an interval
    Polling,
    /// Pushed by the upstream transport
    Subscribing,
}

impl SensorModel {
    pub const ALL: [SensorModel; 3] = [
        SensorModel::NetatmoNws03,
        SensorModel::MilesightAm308l,
        SensorModel::MilesightAm103l,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetatmoNws03 => "netatmo.nws03",
            Self::MilesightAm308l => "milesight.am308l",
            Self::MilesightAm103l => "milesight.am103l",
        }
    }

    pub fn transport(&self) -> TransportShape {
        match self {
            Self::NetatmoNws03 => TransportShape::Polling,
            Self::MilesightAm308l | Self::MilesightAm103l => TransportShape::Subscribing,
        }
    }

    /// Whether `host` is a valid upstream for this model
    pub fn accepts_host(&self, host: &str) -> bool {
        match self.transport() {
            TransportShape::Polling => host == NETATMO_HOST,
            TransportShape::Subscribing => host.ends_with(TTS_HOST_SUFFIX),
        }
    }
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensorModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported sensor model '{s}'"))
    }
}

/// How to reach a sensor upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMetadata {
    pub sensor_model: SensorModel,
    /// Vendor application the sensor is registered under; keys credentials
    pub application_name: String,
    /// `netatmo` or an MQTT broker host
    pub host: String,
}

/// Parsed sensor document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDocument {
    #[serde(default)]
    pub sensors: BTreeMap<String, Sensor>,
    #[serde(default)]
    pub things: BTreeMap<String, Thing>,
    #[serde(default)]
    pub locations: BTreeMap<String, Location>,
    #[serde(default)]
    pub datastreams: BTreeMap<String, Datastream>,
    #[serde(default)]
    pub observed_properties: BTreeMap<String, ObservedProperty>,
    pub network_metadata: NetworkMetadata,
}

impl SensorDocument {
    /// The document's sensor, when exactly one is declared
    pub fn sensor(&self) -> Option<&Sensor> {
        match self.sensors.len() {
            1 => self.sensors.values().next(),
            _ => None,
        }
    }

    pub fn sensor_name(&self) -> Option<&EntityName> {
        self.sensor().map(|s| &s.name)
    }

    /// Every declared entity, section by section in dependency order
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        let ops = self
            .observed_properties
            .values()
            .cloned()
            .map(Entity::ObservedProperty);
        let locations = self.locations.values().cloned().map(Entity::Location);
        let things = self.things.values().cloned().map(Entity::Thing);
        let sensors = self.sensors.values().cloned().map(Entity::Sensor);
        let datastreams = self.datastreams.values().cloned().map(Entity::Datastream);
        ops.chain(locations)
            .chain(things)
            .chain(sensors)
            .chain(datastreams)
    }

    pub fn entity_count(&self) -> usize {
        self.sensors.len()
            + self.things.len()
            + self.locations.len()
            + self.datastreams.len()
            + self.observed_properties.len()
    }
}

/// A configured sensor: its name, upstream metadata and the document that declared it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorBinding {
    pub sensor: EntityName,
    pub metadata: NetworkMetadata,
    pub source: String,
}
