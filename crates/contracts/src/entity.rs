//! Entity definitions
//!
//! SensorThings entities as they are declared in sensor documents. Field names
//! follow the SensorThings wire format (camelCase) so documents and creation
//! payloads share one vocabulary.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

use crate::EntityName;

/// Free-form `properties` object
pub type Properties = Map<String, Value>;

/// Property key that overrides the canonical stream name of a Datastream
pub const STREAM_PROPERTY: &str = "stream";

/// Default encoding for `Location.location`
pub const GEOJSON_ENCODING: &str = "application/geo+json";

/// Entity kind
///
/// Declaration order is dependency order: sorting by kind yields a valid
/// creation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    ObservedProperty,
    Location,
    Thing,
    Sensor,
    Datastream,
}

impl EntityKind {
    /// All kinds, in dependency order
    pub const ALL: [EntityKind; 5] = [
        EntityKind::ObservedProperty,
        EntityKind::Location,
        EntityKind::Thing,
        EntityKind::Sensor,
        EntityKind::Datastream,
    ];

    /// SensorThings type name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObservedProperty => "ObservedProperty",
            Self::Location => "Location",
            Self::Thing => "Thing",
            Self::Sensor => "Sensor",
            Self::Datastream => "Datastream",
        }
    }

    /// Collection path on the entity store
    pub fn collection(&self) -> &'static str {
        match self {
            Self::ObservedProperty => "/ObservedProperties",
            Self::Location => "/Locations",
            Self::Thing => "/Things",
            Self::Sensor => "/Sensors",
            Self::Datastream => "/Datastreams",
        }
    }

    /// Section name in sensor documents
    pub fn section(&self) -> &'static str {
        match self {
            Self::ObservedProperty => "observedProperties",
            Self::Location => "locations",
            Self::Thing => "things",
            Self::Sensor => "sensors",
            Self::Datastream => "datastreams",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn validate_name(name: &EntityName) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len == 0 || len > 255 {
        return Err(ValidationError::new("name_length"));
    }
    Ok(())
}

fn validate_text(text: &str) -> Result<(), ValidationError> {
    let len = text.trim().chars().count();
    if len == 0 || len > 255 {
        return Err(ValidationError::new("text_length"));
    }
    Ok(())
}

// ============================================================================
// ObservedProperty
// ============================================================================

/// The phenomenon a Datastream observes. Leaf entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ObservedProperty {
    #[validate(custom(function = "validate_name"))]
    pub name: EntityName,
    #[validate(custom(function = "validate_text"))]
    pub description: String,
    /// URI of the property definition
    #[validate(custom(function = "validate_text"))]
    pub definition: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Properties,
}

impl ObservedProperty {
    fn conflicting_field(&self, other: &Self) -> Option<&'static str> {
        if self.description != other.description {
            return Some("description");
        }
        if self.definition != other.definition {
            return Some("definition");
        }
        if self.properties != other.properties {
            return Some("properties");
        }
        None
    }
}

// ============================================================================
// Location
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationLinks {
    #[serde(default)]
    pub things: BTreeSet<EntityName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[validate(custom(function = "validate_name"))]
    pub name: EntityName,
    #[validate(custom(function = "validate_text"))]
    pub description: String,
    #[serde(default = "default_geo_encoding")]
    #[validate(custom(function = "validate_text"))]
    pub encoding_type: String,
    /// Geometry, e.g. `{"type": "Point", "coordinates": [4.37, 52.0]}`
    pub location: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Properties,
    #[serde(default, rename = "iot_links")]
    pub links: LocationLinks,
}

fn default_geo_encoding() -> String {
    GEOJSON_ENCODING.to_string()
}

impl Location {
    fn conflicting_field(&self, other: &Self) -> Option<&'static str> {
        if self.description != other.description {
            return Some("description");
        }
        if self.encoding_type != other.encoding_type {
            return Some("encodingType");
        }
        if self.location != other.location {
            return Some("location");
        }
        if self.properties != other.properties {
            return Some("properties");
        }
        None
    }
}

// ============================================================================
// Thing
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThingLinks {
    #[serde(default)]
    pub datastreams: BTreeSet<EntityName>,
    #[serde(default)]
    pub locations: BTreeSet<EntityName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    #[validate(custom(function = "validate_name"))]
    pub name: EntityName,
    #[validate(custom(function = "validate_text"))]
    pub description: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Properties,
    #[serde(default, rename = "iot_links")]
    pub links: ThingLinks,
}

impl Thing {
    fn conflicting_field(&self, other: &Self) -> Option<&'static str> {
        if self.description != other.description {
            return Some("description");
        }
        if self.properties != other.properties {
            return Some("properties");
        }
        None
    }
}

// ============================================================================
// Sensor
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorLinks {
    #[serde(default)]
    pub datastreams: BTreeSet<EntityName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    #[validate(custom(function = "validate_name"))]
    pub name: EntityName,
    #[validate(custom(function = "validate_text"))]
    pub description: String,
    #[validate(custom(function = "validate_text"))]
    pub encoding_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Properties,
    #[serde(default, rename = "iot_links")]
    pub links: SensorLinks,
}

impl Sensor {
    fn conflicting_field(&self, other: &Self) -> Option<&'static str> {
        if self.description != other.description {
            return Some("description");
        }
        if self.encoding_type != other.encoding_type {
            return Some("encodingType");
        }
        if self.metadata != other.metadata {
            return Some("metadata");
        }
        if self.properties != other.properties {
            return Some("properties");
        }
        None
    }
}

// ============================================================================
// Datastream
// ============================================================================

/// Single-valued references of a Datastream.
///
/// Declared as lists in documents; exactly one entry per group is required
/// once the graph is merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatastreamLinks {
    #[serde(default)]
    pub sensors: Vec<EntityName>,
    #[serde(default)]
    pub things: Vec<EntityName>,
    #[serde(default, rename = "observedProperties")]
    pub observed_properties: Vec<EntityName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Datastream {
    #[validate(custom(function = "validate_name"))]
    pub name: EntityName,
    #[validate(custom(function = "validate_text"))]
    pub description: String,
    #[validate(custom(function = "validate_text"))]
    pub observation_type: String,
    #[serde(default)]
    pub unit_of_measurement: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_area: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Properties,
    #[serde(default, rename = "iot_links")]
    pub links: DatastreamLinks,
}

impl Datastream {
    /// Canonical stream this Datastream carries.
    ///
    /// `properties.stream` when present, otherwise the Datastream name.
    pub fn stream_name(&self) -> &str {
        self.properties
            .get(STREAM_PROPERTY)
            .and_then(Value::as_str)
            .unwrap_or(self.name.as_str())
    }

    /// The single Sensor reference, if exactly one is declared
    pub fn sensor(&self) -> Option<&EntityName> {
        single(&self.links.sensors)
    }

    /// The single Thing reference, if exactly one is declared
    pub fn thing(&self) -> Option<&EntityName> {
        single(&self.links.things)
    }

    /// The single ObservedProperty reference, if exactly one is declared
    pub fn observed_property(&self) -> Option<&EntityName> {
        single(&self.links.observed_properties)
    }

    fn conflicting_field(&self, other: &Self) -> Option<&'static str> {
        if self.description != other.description {
            return Some("description");
        }
        if self.observation_type != other.observation_type {
            return Some("observationType");
        }
        if self.unit_of_measurement != other.unit_of_measurement {
            return Some("unitOfMeasurement");
        }
        if self.observed_area != other.observed_area {
            return Some("observedArea");
        }
        if self.properties != other.properties {
            return Some("properties");
        }
        // Single-valued references are attributes, not mergeable link sets.
        if self.links != other.links {
            return Some("iot_links");
        }
        None
    }
}

fn collect<'a>(
    out: &mut Vec<Reference<'a>>,
    field: &'static str,
    kind: EntityKind,
    targets: impl IntoIterator<Item = &'a EntityName>,
) {
    out.extend(targets.into_iter().map(|target| Reference {
        field,
        kind,
        target,
    }));
}

fn single(names: &[EntityName]) -> Option<&EntityName> {
    match names {
        [only] => Some(only),
        _ => None,
    }
}

// ============================================================================
// Entity
// ============================================================================

/// Any graph entity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entity {
    ObservedProperty(ObservedProperty),
    Location(Location),
    Thing(Thing),
    Sensor(Sensor),
    Datastream(Datastream),
}

/// A named reference from one entity to another
#[derive(Debug, Clone, Copy)]
pub struct Reference<'a> {
    pub field: &'static str,
    pub kind: EntityKind,
    pub target: &'a EntityName,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::ObservedProperty(_) => EntityKind::ObservedProperty,
            Self::Location(_) => EntityKind::Location,
            Self::Thing(_) => EntityKind::Thing,
            Self::Sensor(_) => EntityKind::Sensor,
            Self::Datastream(_) => EntityKind::Datastream,
        }
    }

    pub fn name(&self) -> &EntityName {
        match self {
            Self::ObservedProperty(e) => &e.name,
            Self::Location(e) => &e.name,
            Self::Thing(e) => &e.name,
            Self::Sensor(e) => &e.name,
            Self::Datastream(e) => &e.name,
        }
    }

    /// First attribute that differs between two declarations of the same name.
    ///
    /// Multi-valued link sets are not attributes. Different kinds always
    /// conflict on `kind`.
    pub fn conflicting_field(&self, other: &Entity) -> Option<&'static str> {
        match (self, other) {
            (Self::ObservedProperty(a), Self::ObservedProperty(b)) => a.conflicting_field(b),
            (Self::Location(a), Self::Location(b)) => a.conflicting_field(b),
            (Self::Thing(a), Self::Thing(b)) => a.conflicting_field(b),
            (Self::Sensor(a), Self::Sensor(b)) => a.conflicting_field(b),
            (Self::Datastream(a), Self::Datastream(b)) => a.conflicting_field(b),
            _ => Some("kind"),
        }
    }

    /// Union the multi-valued link sets of an equivalent declaration
    pub fn absorb_links(&mut self, other: Entity) {
        match (self, other) {
            (Self::Location(a), Self::Location(b)) => a.links.things.extend(b.links.things),
            (Self::Thing(a), Self::Thing(b)) => {
                a.links.datastreams.extend(b.links.datastreams);
                a.links.locations.extend(b.links.locations);
            }
            (Self::Sensor(a), Self::Sensor(b)) => a.links.datastreams.extend(b.links.datastreams),
            _ => {}
        }
    }

    /// Every named reference this entity declares
    pub fn references(&self) -> Vec<Reference<'_>> {
        let mut refs = Vec::new();
        match self {
            Self::ObservedProperty(_) => {}
            Self::Location(e) => collect(&mut refs, "things", EntityKind::Thing, &e.links.things),
            Self::Thing(e) => {
                collect(
                    &mut refs,
                    "datastreams",
                    EntityKind::Datastream,
                    &e.links.datastreams,
                );
                collect(&mut refs, "locations", EntityKind::Location, &e.links.locations);
            }
            Self::Sensor(e) => collect(
                &mut refs,
                "datastreams",
                EntityKind::Datastream,
                &e.links.datastreams,
            ),
            Self::Datastream(e) => {
                collect(&mut refs, "sensors", EntityKind::Sensor, &e.links.sensors);
                collect(&mut refs, "things", EntityKind::Thing, &e.links.things);
                collect(
                    &mut refs,
                    "observedProperties",
                    EntityKind::ObservedProperty,
                    &e.links.observed_properties,
                );
            }
        }
        refs
    }

    /// Run field constraints (`name`, `description`, ... within 1..=255 chars)
    pub fn validate_fields(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            Self::ObservedProperty(e) => e.validate(),
            Self::Location(e) => e.validate(),
            Self::Thing(e) => e.validate(),
            Self::Sensor(e) => e.validate(),
            Self::Datastream(e) => e.validate(),
        }
    }
}
