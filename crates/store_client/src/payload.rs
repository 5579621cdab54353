//! Creation payloads
//!
//! Turns a declared entity into the JSON body the entity store expects.
//! Dependencies are embedded by remote id, never by name; link sets and
//! provenance stay local.

use contracts::{
    Datastream, Entity, EntityKind, EntityName, Location, ObservedProperty, Properties, RemoteId,
    Sensor, Thing,
};
use serde_json::{json, Value};

use crate::cache::IdentifierCache;
use crate::error::{Result, StoreError};

/// Build the creation body for `entity`, resolving dependencies through `cache`
///
/// # Errors
/// `MissingDependency` when a dependency has not been reconciled yet
pub fn creation_body(entity: &Entity, cache: &IdentifierCache) -> Result<Value> {
    match entity {
        Entity::ObservedProperty(op) => Ok(observed_property_body(op)),
        Entity::Location(location) => Ok(location_body(location)),
        Entity::Thing(thing) => thing_body(thing, cache),
        Entity::Sensor(sensor) => Ok(sensor_body(sensor)),
        Entity::Datastream(ds) => datastream_body(ds, cache),
    }
}

fn observed_property_body(op: &ObservedProperty) -> Value {
    let mut body = json!({
        "name": op.name,
        "description": op.description,
        "definition": op.definition,
    });
    with_properties(&mut body, &op.properties);
    body
}

fn location_body(location: &Location) -> Value {
    let mut body = json!({
        "name": location.name,
        "description": location.description,
        "encodingType": location.encoding_type,
        "location": location.location,
    });
    with_properties(&mut body, &location.properties);
    body
}

fn thing_body(thing: &Thing, cache: &IdentifierCache) -> Result<Value> {
    let locations = thing
        .links
        .locations
        .iter()
        .map(|location| {
            dependency(cache, EntityKind::Thing, &thing.name, EntityKind::Location, location)
                .map(|id| id.as_reference())
        })
        .collect::<Result<Vec<_>>>()?;

    let mut body = json!({
        "name": thing.name,
        "description": thing.description,
    });
    with_properties(&mut body, &thing.properties);
    if !locations.is_empty() {
        insert(&mut body, "Locations", Value::Array(locations));
    }
    Ok(body)
}

fn sensor_body(sensor: &Sensor) -> Value {
    let mut body = json!({
        "name": sensor.name,
        "description": sensor.description,
        "encodingType": sensor.encoding_type,
        "metadata": sensor.metadata.clone().unwrap_or_else(|| Value::String(String::new())),
    });
    with_properties(&mut body, &sensor.properties);
    body
}

fn datastream_body(ds: &Datastream, cache: &IdentifierCache) -> Result<Value> {
    let thing = required(cache, ds, EntityKind::Thing, ds.thing())?;
    let sensor = required(cache, ds, EntityKind::Sensor, ds.sensor())?;
    let observed_property = required(
        cache,
        ds,
        EntityKind::ObservedProperty,
        ds.observed_property(),
    )?;

    let mut body = json!({
        "name": ds.name,
        "description": ds.description,
        "observationType": ds.observation_type,
        "unitOfMeasurement": ds.unit_of_measurement,
        "Thing": thing.as_reference(),
        "Sensor": sensor.as_reference(),
        "ObservedProperty": observed_property.as_reference(),
    });
    if let Some(area) = &ds.observed_area {
        insert(&mut body, "observedArea", area.clone());
    }
    with_properties(&mut body, &ds.properties);
    Ok(body)
}

fn required(
    cache: &IdentifierCache,
    ds: &Datastream,
    kind: EntityKind,
    target: Option<&EntityName>,
) -> Result<RemoteId> {
    let Some(target) = target else {
        return Err(StoreError::MissingDependency {
            kind: EntityKind::Datastream,
            name: ds.name.clone(),
            dependency_kind: kind,
            dependency: EntityName::from("<undeclared>"),
        });
    };
    dependency(cache, EntityKind::Datastream, &ds.name, kind, target)
}

fn dependency(
    cache: &IdentifierCache,
    kind: EntityKind,
    name: &EntityName,
    dependency_kind: EntityKind,
    dependency: &EntityName,
) -> Result<RemoteId> {
    cache
        .get(dependency_kind, dependency)
        .ok_or_else(|| StoreError::MissingDependency {
            kind,
            name: name.clone(),
            dependency_kind,
            dependency: dependency.clone(),
        })
}

fn with_properties(body: &mut Value, properties: &Properties) {
    if !properties.is_empty() {
        insert(body, "properties", Value::Object(properties.clone()));
    }
}

fn insert(body: &mut Value, key: &str, value: Value) {
    if let Some(map) = body.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DatastreamLinks, ThingLinks};

    fn datastream() -> Datastream {
        serde_json::from_value(json!({
            "name": "s1_co2",
            "description": "CO2 concentration",
            "observationType": "OM_Measurement",
            "unitOfMeasurement": {"name": "ppm", "symbol": "ppm"},
            "properties": {"stream": "co2"},
            "iot_links": {"sensors": ["s1"], "things": ["Desk"], "observedProperties": ["co2"]}
        }))
        .unwrap()
    }

    #[test]
    fn test_datastream_body_embeds_remote_ids() {
        let cache = IdentifierCache::new();
        cache.insert(EntityKind::Thing, &"Desk".into(), RemoteId::Number(1));
        cache.insert(EntityKind::Sensor, &"s1".into(), RemoteId::Number(2));
        cache.insert(EntityKind::ObservedProperty, &"co2".into(), RemoteId::Number(3));

        let body = creation_body(&Entity::Datastream(datastream()), &cache).unwrap();
        assert_eq!(body["Thing"], json!({"@iot.id": 1}));
        assert_eq!(body["Sensor"], json!({"@iot.id": 2}));
        assert_eq!(body["ObservedProperty"], json!({"@iot.id": 3}));
        assert_eq!(body["properties"]["stream"], "co2");
        assert!(body.get("iot_links").is_none());
    }

    #[test]
    fn test_datastream_missing_dependency() {
        let cache = IdentifierCache::new();
        cache.insert(EntityKind::Thing, &"Desk".into(), RemoteId::Number(1));

        let err = creation_body(&Entity::Datastream(datastream()), &cache).unwrap_err();
        assert!(
            matches!(
                err,
                StoreError::MissingDependency {
                    dependency_kind: EntityKind::Sensor,
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn test_thing_links_locations() {
        let cache = IdentifierCache::new();
        cache.insert(EntityKind::Location, &"Room120".into(), RemoteId::Number(8));
        let thing = Thing {
            name: "Desk".into(),
            description: "Lab desk".into(),
            properties: Properties::new(),
            links: ThingLinks {
                datastreams: Default::default(),
                locations: ["Room120".into()].into_iter().collect(),
            },
        };
        let body = creation_body(&Entity::Thing(thing), &cache).unwrap();
        assert_eq!(body["Locations"], json!([{"@iot.id": 8}]));
        assert!(body.get("properties").is_none());
    }

    #[test]
    fn test_undeclared_reference_is_missing_dependency() {
        let ds = Datastream {
            links: DatastreamLinks::default(),
            ..datastream()
        };
        let cache = IdentifierCache::new();
        assert!(creation_body(&Entity::Datastream(ds), &cache).is_err());
    }
}
