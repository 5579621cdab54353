//! Canonical stream to Datastream routing

use std::collections::BTreeMap;

use contracts::{EntityGraph, EntityName};

/// Where one sensor's observations go
///
/// Built from the merged graph: every Datastream referencing the sensor
/// contributes `stream_name() -> name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorRoutes {
    routes: BTreeMap<String, EntityName>,
}

impl SensorRoutes {
    pub fn from_graph(graph: &EntityGraph, sensor: &str) -> Self {
        let routes = graph
            .datastreams_of(sensor)
            .map(|ds| (ds.stream_name().to_string(), ds.name.clone()))
            .collect();
        Self { routes }
    }

    pub fn with_route(
        mut self,
        stream: impl Into<String>,
        datastream: impl Into<EntityName>,
    ) -> Self {
        self.routes.insert(stream.into(), datastream.into());
        self
    }

    pub fn route(&self, stream: &str) -> Option<&EntityName> {
        self.routes.get(stream)
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
