//! Graph builder
//!
//! Merges validated sensor documents into one `EntityGraph`. Merging is
//! order-independent: entity maps are keyed by name, link sets are unions and
//! bindings are sorted, so any permutation of the same documents builds the
//! same topology. Structural validation runs once, after the last document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use contracts::{ContractError, EntityGraph, EntityName, SensorBinding, SensorDocument};

use crate::validator;

/// Loaded, merged and validated topology
#[derive(Debug, Clone)]
pub struct Topology {
    pub graph: EntityGraph,
    /// One binding per sensor, sorted by sensor name
    pub sensors: Vec<SensorBinding>,
    /// Documents merged into the graph
    pub documents: Vec<PathBuf>,
    /// Documents skipped because they failed to parse or validate
    pub invalid_documents: Vec<InvalidDocument>,
    /// Files ignored because their name marks them as templates
    pub skipped_templates: Vec<PathBuf>,
}

impl Topology {
    pub fn binding(&self, sensor: &str) -> Option<&SensorBinding> {
        self.sensors.iter().find(|b| b.sensor == *sensor)
    }
}

/// A document rejected before merging
#[derive(Debug, Clone)]
pub struct InvalidDocument {
    pub path: PathBuf,
    pub reason: String,
}

/// Incremental, order-independent document merger
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: EntityGraph,
    bindings: BTreeMap<EntityName, SensorBinding>,
    documents: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate one document and merge its entities.
    ///
    /// # Errors
    /// - per-document validation failure (`ConfigValidation`)
    /// - an entity conflicting with an earlier document (`DuplicateConflict`)
    /// - the same sensor bound to different network metadata
    pub fn add_document(&mut self, source: &str, doc: SensorDocument) -> Result<(), ContractError> {
        validator::validate_document(&doc, source)?;

        let Some(sensor) = doc.sensor_name().cloned() else {
            return Err(ContractError::config_validation(
                format!("{source}: sensors"),
                "document declares no sensor",
            ));
        };

        if let Some(existing) = self.bindings.get(&sensor) {
            if existing.metadata != doc.network_metadata {
                return Err(ContractError::config_validation(
                    format!("{source}: networkMetadata"),
                    format!(
                        "sensor '{sensor}' is bound differently in '{}'",
                        existing.source
                    ),
                ));
            }
        }

        for entity in doc.entities() {
            self.graph.insert(entity, source)?;
        }

        self.bindings
            .entry(sensor.clone())
            .or_insert_with(|| SensorBinding {
                sensor,
                metadata: doc.network_metadata.clone(),
                source: source.to_string(),
            });
        self.documents += 1;
        Ok(())
    }

    pub fn document_count(&self) -> usize {
        self.documents
    }

    /// Finish merging and validate the whole graph.
    ///
    /// # Errors
    /// `DanglingReference` or `ConfigValidation` from graph validation
    pub fn build(self) -> Result<(EntityGraph, Vec<SensorBinding>), ContractError> {
        self.graph.validate()?;
        Ok((self.graph, self.bindings.into_values().collect()))
    }
}
