//! Entity graph - merged, deduplicated topology
//!
//! One node per (kind, name). Nodes remember which documents declared them so
//! conflicts can name both sides.

use std::collections::BTreeMap;

use crate::{
    ContractError, Datastream, Entity, EntityKind, EntityName, Location, ObservedProperty,
    Reference, Sensor, Thing,
};

/// Graph node: the entity plus the documents that declared it
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub entity: Entity,
    pub sources: Vec<String>,
}

/// Result of a successful insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First declaration of this name
    Inserted,
    /// Equivalent redeclaration, link sets unioned
    Merged,
}

/// Merged entity graph
///
/// Iteration is always in dependency order (by kind, see [`EntityKind`]) and
/// then by name, so two graphs built from the same declarations iterate
/// identically regardless of input order.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    nodes: BTreeMap<EntityKind, BTreeMap<EntityName, GraphNode>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity declared by `source`.
    ///
    /// Equal attributes merge (no-op apart from link union and provenance);
    /// different attributes fail with `DuplicateConflict`.
    pub fn insert(&mut self, entity: Entity, source: &str) -> Result<InsertOutcome, ContractError> {
        let kind = entity.kind();
        let by_name = self.nodes.entry(kind).or_default();

        let Some(node) = by_name.get_mut(entity.name().as_str()) else {
            by_name.insert(
                entity.name().clone(),
                GraphNode {
                    entity,
                    sources: vec![source.to_string()],
                },
            );
            return Ok(InsertOutcome::Inserted);
        };

        if let Some(field) = node.entity.conflicting_field(&entity) {
            return Err(ContractError::DuplicateConflict {
                kind,
                name: entity.name().clone(),
                field,
                first_source: node.sources.first().cloned().unwrap_or_default(),
                second_source: source.to_string(),
            });
        }

        node.entity.absorb_links(entity);
        if !node.sources.iter().any(|s| s == source) {
            node.sources.push(source.to_string());
        }
        Ok(InsertOutcome::Merged)
    }

    /// Merge another graph into this one, keeping provenance
    pub fn merge(&mut self, other: EntityGraph) -> Result<(), ContractError> {
        for (kind, by_name) in other.nodes {
            for (name, node) in by_name {
                let mut sources = node.sources.into_iter();
                let first = sources.next().unwrap_or_default();
                self.insert(node.entity, &first)?;
                if let Some(merged) = self.nodes.get_mut(&kind).and_then(|m| m.get_mut(&name)) {
                    for source in sources {
                        if !merged.sources.contains(&source) {
                            merged.sources.push(source);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&Entity> {
        self.node(kind, name).map(|n| &n.entity)
    }

    pub fn node(&self, kind: EntityKind, name: &str) -> Option<&GraphNode> {
        self.nodes.get(&kind).and_then(|m| m.get(name))
    }

    pub fn contains(&self, kind: EntityKind, name: &str) -> bool {
        self.node(kind, name).is_some()
    }

    /// Documents that declared an entity
    pub fn sources(&self, kind: EntityKind, name: &str) -> &[String] {
        self.node(kind, name)
            .map(|n| n.sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn observed_property(&self, name: &str) -> Option<&ObservedProperty> {
        match self.get(EntityKind::ObservedProperty, name)? {
            Entity::ObservedProperty(e) => Some(e),
            _ => None,
        }
    }

    pub fn location(&self, name: &str) -> Option<&Location> {
        match self.get(EntityKind::Location, name)? {
            Entity::Location(e) => Some(e),
            _ => None,
        }
    }

    pub fn thing(&self, name: &str) -> Option<&Thing> {
        match self.get(EntityKind::Thing, name)? {
            Entity::Thing(e) => Some(e),
            _ => None,
        }
    }

    pub fn sensor(&self, name: &str) -> Option<&Sensor> {
        match self.get(EntityKind::Sensor, name)? {
            Entity::Sensor(e) => Some(e),
            _ => None,
        }
    }

    pub fn datastream(&self, name: &str) -> Option<&Datastream> {
        match self.get(EntityKind::Datastream, name)? {
            Entity::Datastream(e) => Some(e),
            _ => None,
        }
    }

    /// All entities in dependency order: ObservedProperty, Location, Thing,
    /// Sensor, Datastream.
    pub fn in_dependency_order(&self) -> impl Iterator<Item = &Entity> {
        self.nodes
            .values()
            .flat_map(|m| m.values())
            .map(|n| &n.entity)
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.nodes
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.values())
            .map(|n| &n.entity)
    }

    pub fn names(&self, kind: EntityKind) -> impl Iterator<Item = &EntityName> {
        self.nodes.get(&kind).into_iter().flat_map(|m| m.keys())
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.of_kind(EntityKind::Sensor).filter_map(|e| match e {
            Entity::Sensor(s) => Some(s),
            _ => None,
        })
    }

    pub fn datastreams(&self) -> impl Iterator<Item = &Datastream> {
        self.of_kind(EntityKind::Datastream).filter_map(|e| match e {
            Entity::Datastream(d) => Some(d),
            _ => None,
        })
    }

    /// Datastreams whose single Sensor reference is `sensor`
    pub fn datastreams_of<'a>(&'a self, sensor: &'a str) -> impl Iterator<Item = &'a Datastream> {
        self.datastreams()
            .filter(move |d| d.sensor().is_some_and(|s| s == sensor))
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.nodes.get(&kind).map_or(0, |m| m.len())
    }

    pub fn len(&self) -> usize {
        self.nodes.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve one named reference declared by `from`
    pub fn resolve(
        &self,
        from: &Entity,
        reference: &Reference<'_>,
    ) -> Result<&Entity, ContractError> {
        self.get(reference.kind, reference.target).ok_or_else(|| {
            ContractError::missing_reference(
                from.kind(),
                from.name(),
                reference.field,
                reference.target,
            )
        })
    }

    /// Structural validation of the fully merged graph.
    ///
    /// Reports the first violation in dependency order:
    /// 1. every named reference resolves
    /// 2. every Datastream has exactly one Sensor, Thing and ObservedProperty
    /// 3. Sensor and Thing datastream sets agree with the Datastreams' own references
    /// 4. no two Datastreams of one Sensor carry the same stream name
    pub fn validate(&self) -> Result<(), ContractError> {
        for entity in self.in_dependency_order() {
            for reference in entity.references() {
                self.resolve(entity, &reference)?;
            }
        }

        for entity in self.of_kind(EntityKind::Datastream) {
            let Entity::Datastream(ds) = entity else {
                continue;
            };
            check_single(ds, "sensors", &ds.links.sensors)?;
            check_single(ds, "things", &ds.links.things)?;
            check_single(ds, "observedProperties", &ds.links.observed_properties)?;
        }

        self.check_link_agreement()?;
        self.check_stream_names()
    }

    /// A sensor's stream names must route to exactly one Datastream each
    fn check_stream_names(&self) -> Result<(), ContractError> {
        for sensor in self.sensors() {
            let mut seen: BTreeMap<&str, &EntityName> = BTreeMap::new();
            for ds in self.datastreams_of(&sensor.name) {
                if let Some(first) = seen.insert(ds.stream_name(), &ds.name) {
                    return Err(ContractError::config_validation(
                        format!("datastreams.{}.properties.stream", ds.name),
                        format!(
                            "Datastreams '{first}' and '{}' of Sensor '{}' both carry stream '{}'",
                            ds.name,
                            sensor.name,
                            ds.stream_name()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_link_agreement(&self) -> Result<(), ContractError> {
        for sensor in self.sensors() {
            for ds_name in &sensor.links.datastreams {
                let declared = self.datastream(ds_name).and_then(|d| d.sensor());
                if declared != Some(&sensor.name) {
                    return Err(one_sided(
                        EntityKind::Sensor,
                        &sensor.name,
                        ds_name,
                        "sensors",
                        declared,
                    ));
                }
            }
        }

        for entity in self.of_kind(EntityKind::Thing) {
            let Entity::Thing(thing) = entity else {
                continue;
            };
            for ds_name in &thing.links.datastreams {
                let declared = self.datastream(ds_name).and_then(|d| d.thing());
                if declared != Some(&thing.name) {
                    return Err(one_sided(
                        EntityKind::Thing,
                        &thing.name,
                        ds_name,
                        "things",
                        declared,
                    ));
                }
            }
        }

        for entity in self.of_kind(EntityKind::Datastream) {
            let Entity::Datastream(ds) = entity else {
                continue;
            };
            if let Some(sensor) = ds.sensor().and_then(|s| self.sensor(s)) {
                if !sensor.links.datastreams.contains(&ds.name) {
                    return Err(ContractError::config_validation(
                        format!("sensors.{}.iot_links.datastreams", sensor.name),
                        format!(
                            "Datastream '{}' references Sensor '{}' but the Sensor does not list it",
                            ds.name, sensor.name
                        ),
                    ));
                }
            }
            if let Some(thing) = ds.thing().and_then(|t| self.thing(t)) {
                if !thing.links.datastreams.contains(&ds.name) {
                    return Err(ContractError::config_validation(
                        format!("things.{}.iot_links.datastreams", thing.name),
                        format!(
                            "Datastream '{}' references Thing '{}' but the Thing does not list it",
                            ds.name, thing.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_single(
    ds: &Datastream,
    field: &'static str,
    names: &[EntityName],
) -> Result<(), ContractError> {
    match names.len() {
        1 => Ok(()),
        0 => Err(ContractError::undeclared_reference(
            EntityKind::Datastream,
            &ds.name,
            field,
        )),
        n => Err(ContractError::config_validation(
            format!("datastreams.{}.iot_links.{field}", ds.name),
            format!("expected exactly one reference, found {n}"),
        )),
    }
}

fn one_sided(
    kind: EntityKind,
    owner: &EntityName,
    ds_name: &EntityName,
    back_field: &str,
    declared: Option<&EntityName>,
) -> ContractError {
    let section = kind.section();
    let found = declared.map_or_else(|| "none".to_string(), |n| format!("'{n}'"));
    ContractError::config_validation(
        format!("{section}.{owner}.iot_links.datastreams"),
        format!(
            "{kind} '{owner}' lists Datastream '{ds_name}' whose {back_field} reference is {found}"
        ),
    )
}

impl PartialEq for EntityGraph {
    /// Structural equality; provenance is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .in_dependency_order()
                .zip(other.in_dependency_order())
                .all(|(a, b)| a == b)
    }
}
