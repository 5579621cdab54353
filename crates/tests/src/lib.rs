//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Responsibilities:
//! - Error classification across crate seams
//! - Mock e2e runs: sensor documents -> reconcile -> stream -> store
//!   (no upstream vendors, no entity store server)

#[cfg(test)]
mod contract_tests {
    use contracts::{ErrorClass, SourceError, SubmitError};
    use store_client::StoreError;

    #[test]
    fn test_store_errors_keep_their_class_across_the_sink() {
        let unavailable: SubmitError = StoreError::unavailable("create Observation", "503").into();
        assert_eq!(unavailable.class(), ErrorClass::Retryable);

        let rejected: SubmitError =
            StoreError::rejected("create Observation", Some(401), "unauthorized").into();
        assert_eq!(rejected.class(), ErrorClass::NonRetryable);

        let auth = SourceError::auth_expired("s1", "refresh token revoked");
        assert_eq!(auth.class(), ErrorClass::AuthExpired);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use config_loader::{ConfigLoader, LoadOptions, Topology};
    use contracts::{
        EntityKind, ErrorClass, ObservationSink, ReadingBatch, RemoteId, SchedulerSettings,
        SensorModel, SourceAdapter, SourceError, SubscribingSource,
    };
    use ingestion::{MockPollingSource, MockSubscribingSource, TransformMapper};
    use observability::HealthReport;
    use scheduler::{StreamScheduler, TaskState};
    use serde_json::{json, Value};
    use store_client::{
        MockFailure, MockStore, MockStoreConfig, Reconciler, StoreCall, StoreClient, StoreSink,
    };

    const NETATMO: &str = "netatmo.nws03";
    const AM308L: &str = "milesight.am308l";
    const TTS_HOST: &str = "eu1.cloud.thethings.network";
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    const TEST_BUDGET: Duration = Duration::from_secs(600);

    /// One sensor document: the sensor, its desk, the shared `Lab` location,
    /// one Datastream and ObservedProperty per stream
    fn document(sensor: &str, model: &str, host: &str, streams: &[&str]) -> String {
        let datastreams = streams
            .iter()
            .map(|s| format!("{sensor}_{s}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut doc = format!(
            r#"
sensors:
  {sensor}:
    name: {sensor}
    description: {model} sensor
    encodingType: application/pdf
    iot_links:
      datastreams: [{datastreams}]
things:
  Desk_{sensor}:
    name: Desk_{sensor}
    description: Lab desk
    iot_links:
      datastreams: [{datastreams}]
      locations: [Lab]
locations:
  Lab:
    name: Lab
    description: Shared lab room
    location: {{type: Point, coordinates: [4.37, 52.0]}}
    iot_links:
      things: [Desk_{sensor}]
datastreams:
"#
        );
        for stream in streams {
            doc.push_str(&format!(
                r#"  {sensor}_{stream}:
    name: {sensor}_{stream}
    description: {stream} of {sensor}
    observationType: OM_Measurement
    unitOfMeasurement: {{name: unit, symbol: u}}
    properties: {{stream: {stream}}}
    iot_links:
      sensors: [{sensor}]
      things: [Desk_{sensor}]
      observedProperties: [{stream}]
"#
            ));
        }
        doc.push_str("observedProperties:\n");
        for stream in streams {
            doc.push_str(&format!(
                "  {stream}:\n    name: {stream}\n    description: {stream}\n    definition: https://example.org/{stream}\n"
            ));
        }
        doc.push_str(&format!(
            "networkMetadata:\n  sensor_model: {model}\n  application_name: lab\n  host: {host}\n"
        ));
        doc
    }

    fn write_documents(dir: &Path) {
        std::fs::write(
            dir.join("s1.yaml"),
            document("s1", NETATMO, "netatmo", &["temperature_indoor", "co2", "humidity"]),
        )
        .unwrap();
        std::fs::write(
            dir.join("s2.yaml"),
            document("s2", AM308L, TTS_HOST, &["co2", "humidity", "passive_infrared"]),
        )
        .unwrap();
    }

    fn topology() -> Topology {
        let dir = tempfile::tempdir().unwrap();
        write_documents(dir.path());
        ConfigLoader::load_topology(dir.path(), LoadOptions::default()).unwrap()
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            poll_interval_secs: 60,
            backoff_jitter: 0.0,
            ..SchedulerSettings::default()
        }
    }

    fn client(store: MockStore) -> Arc<StoreClient<MockStore>> {
        Arc::new(StoreClient::new(store, REQUEST_TIMEOUT))
    }

    fn netatmo_reading(temperature: f64, co2: i64, humidity: i64) -> ReadingBatch {
        ReadingBatch::new("s1")
            .at(Utc::now())
            .with_field("Temperature", temperature)
            .with_field("CO2", co2)
            .with_field("Humidity", humidity)
            .with_field("temp_trend", "stable")
    }

    /// Accepted observations as (datastream name, result)
    fn landed(store: &MockStore, topology: &Topology) -> Vec<(String, Value)> {
        let names: Vec<(RemoteId, String)> = topology
            .graph
            .datastreams()
            .filter_map(|ds| {
                store
                    .id_of(EntityKind::Datastream, &ds.name)
                    .map(|id| (id, ds.name.to_string()))
            })
            .collect();
        store
            .observations()
            .into_iter()
            .map(|(id, body)| {
                let name = names
                    .iter()
                    .find(|(known, _)| *known == id)
                    .map(|(_, n)| n.clone())
                    .unwrap_or_else(|| format!("unknown {id}"));
                (name, body["result"].clone())
            })
            .collect()
    }

    async fn wait_for_observations(client: &StoreClient<MockStore>, count: usize) {
        while client.store().observations().len() < count {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Documents -> reconcile -> both transport shapes stream into the store
    #[tokio::test(start_paused = true)]
    async fn test_e2e_documents_to_observations() {
        tokio::time::timeout(TEST_BUDGET, async {
            let topology = topology();
            let client = client(MockStore::new());

            let report = Reconciler::new(&client).reconcile(&topology.graph).await.unwrap();
            assert_eq!(report.created.len(), 15);
            assert_eq!(report.created_count(EntityKind::Location), 1);
            assert_eq!(report.created_count(EntityKind::ObservedProperty), 4);
            assert_eq!(report.created_count(EntityKind::Datastream), 6);

            let graph = Arc::new(topology.graph.clone());
            let sink = Arc::new(StoreSink::new(Arc::clone(&client), Arc::clone(&graph)));
            let mut scheduler = StreamScheduler::new(sink, graph, settings());

            let polling = MockPollingSource::new("s1");
            polling.push_batch(netatmo_reading(21.5, 480, 40));
            let subscribing = MockSubscribingSource::new("s2");
            let uplinks = subscribing.handle();

            scheduler
                .spawn(
                    SourceAdapter::Polling(Box::new(polling)),
                    TransformMapper::for_model(SensorModel::NetatmoNws03),
                )
                .unwrap();
            scheduler
                .spawn(
                    SourceAdapter::Subscribing(Box::new(subscribing)),
                    TransformMapper::for_model(SensorModel::MilesightAm308l),
                )
                .unwrap();

            assert!(uplinks.emit_batch(
                ReadingBatch::new("s2")
                    .with_field("co2", 510)
                    .with_field("humidity", 38)
                    .with_field("pir", "trigger")
            ));
            wait_for_observations(&client, 6).await;

            let mut landed = landed(client.store(), &topology);
            landed.sort_by(|a, b| a.0.cmp(&b.0));
            assert_eq!(
                landed,
                vec![
                    ("s1_co2".to_string(), json!(480)),
                    ("s1_humidity".to_string(), json!(40)),
                    ("s1_temperature_indoor".to_string(), json!(21.5)),
                    ("s2_co2".to_string(), json!(510)),
                    ("s2_humidity".to_string(), json!(38)),
                    ("s2_passive_infrared".to_string(), json!(true)),
                ]
            );

            let summary = scheduler.shutdown(Duration::from_secs(5)).await;
            assert!(summary.aborted.is_empty());
            assert!(summary.sensors.iter().all(|s| s.state == TaskState::Stopped));
            assert!(!uplinks.is_subscribed());

            let health = HealthReport::collect(summary.uptime, &summary.sensors, 0, Utc::now());
            assert_eq!(health.dead().count(), 2);
            assert_eq!(health.stale().count(), 0);
            let created: u64 = health.sensors.iter().map(|s| s.observations_created).sum();
            assert!(created >= 6);
        })
        .await
        .expect("test exceeded its time budget");
    }

    /// A second run finds everything and creates nothing
    #[tokio::test]
    async fn test_e2e_reconcile_is_idempotent() {
        let topology = topology();
        let store = client(MockStore::new());
        Reconciler::new(&store).reconcile(&topology.graph).await.unwrap();
        let creations = store.store().creation_count();

        // fresh client: nothing cached, everything must be found remotely
        let rerun = StoreClient::new(MockStore::new(), REQUEST_TIMEOUT);
        for (kind, name) in store.store().creations() {
            let id = store.store().id_of(kind, &name).unwrap();
            rerun.store().seed(kind, &name, id);
        }
        let report = Reconciler::new(&rerun).reconcile(&topology.graph).await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.existing.len(), creations);
        assert_eq!(rerun.store().creation_count(), 0);
    }

    /// A timed-out submission is retried after backoff; nothing is lost or reordered
    #[tokio::test(start_paused = true)]
    async fn test_e2e_submission_timeout_is_retried() {
        tokio::time::timeout(TEST_BUDGET, async {
            let topology = topology();
            let client = client(MockStore::new());
            Reconciler::new(&client).reconcile(&topology.graph).await.unwrap();
            client.store().script_observation_failures([
                None,
                None,
                Some(MockFailure::Delay(REQUEST_TIMEOUT * 4)),
            ]);

            let graph = Arc::new(topology.graph.clone());
            let sink = Arc::new(StoreSink::new(Arc::clone(&client), Arc::clone(&graph)));
            let mut scheduler = StreamScheduler::new(sink, graph, settings());
            let mut failures = scheduler.failure_events();

            let polling = MockPollingSource::new("s1");
            polling.push_batch(netatmo_reading(22.0, 450, 41));
            scheduler
                .spawn(
                    SourceAdapter::Polling(Box::new(polling)),
                    TransformMapper::for_model(SensorModel::NetatmoNws03),
                )
                .unwrap();
            wait_for_observations(&client, 3).await;

            let order: Vec<String> = landed(client.store(), &topology)
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            assert_eq!(order, vec!["s1_temperature_indoor", "s1_co2", "s1_humidity"]);

            let attempts = client
                .store()
                .calls()
                .iter()
                .filter(|c| matches!(c, StoreCall::Observation { .. }))
                .count();
            assert_eq!(attempts, 4);

            let event = failures.recv().await.unwrap();
            assert_eq!(event.sensor, "s1");
            assert_eq!(event.class, ErrorClass::Retryable);

            let snap = scheduler.handle("s1").unwrap().metrics().snapshot();
            assert_eq!(snap.backoffs, 1);
            assert_eq!(snap.dropped_observations, 0);
            scheduler.shutdown(Duration::from_secs(5)).await;
        })
        .await
        .expect("test exceeded its time budget");
    }

    /// A rejected entity aborts reconciliation before any Datastream exists
    #[tokio::test]
    async fn test_e2e_reconcile_abort_names_entity() {
        let topology = topology();
        let client = client(MockStore::with_config(MockStoreConfig {
            reject_names: vec!["s2".to_string()],
            ..MockStoreConfig::default()
        }));

        let err = Reconciler::new(&client)
            .reconcile(&topology.graph)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'s2'"), "{message}");
        assert!(message.contains("s2.yaml"), "{message}");
        assert!(!client
            .store()
            .creations()
            .iter()
            .any(|(kind, _)| *kind == EntityKind::Datastream));
    }

    /// One sensor's expired upstream credentials never stall another sensor
    #[tokio::test(start_paused = true)]
    async fn test_e2e_auth_expired_is_isolated() {
        tokio::time::timeout(TEST_BUDGET, async {
            let topology = topology();
            let client = client(MockStore::new());
            Reconciler::new(&client).reconcile(&topology.graph).await.unwrap();

            let graph = Arc::new(topology.graph.clone());
            let sink = Arc::new(StoreSink::new(Arc::clone(&client), Arc::clone(&graph)));
            let mut scheduler = StreamScheduler::new(sink, graph, settings());

            let expired = MockPollingSource::new("s1");
            expired.push_error(SourceError::auth_expired("s1", "refresh token revoked"));
            let subscribing = MockSubscribingSource::new("s2");
            let uplinks = subscribing.handle();
            scheduler
                .spawn(
                    SourceAdapter::Polling(Box::new(expired.clone())),
                    TransformMapper::for_model(SensorModel::NetatmoNws03),
                )
                .unwrap();
            scheduler
                .spawn(
                    SourceAdapter::Subscribing(Box::new(subscribing)),
                    TransformMapper::for_model(SensorModel::MilesightAm308l),
                )
                .unwrap();

            for co2 in [500, 505, 510] {
                tokio::time::sleep(Duration::from_secs(90)).await;
                uplinks.emit_batch(ReadingBatch::new("s2").with_field("co2", co2));
            }
            wait_for_observations(&client, 3).await;

            let landed = landed(client.store(), &topology);
            assert!(landed.iter().all(|(name, _)| name == "s2_co2"));
            assert_eq!(
                landed.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
                vec![json!(500), json!(505), json!(510)]
            );
            assert!(expired.refresh_count() >= 3);
            assert!(scheduler.handle("s1").unwrap().is_alive());
            scheduler.shutdown(Duration::from_secs(5)).await;
        })
        .await
        .expect("test exceeded its time budget");
    }

    /// A Datastream missing from the cache is resolved, with its dependencies, on demand
    #[tokio::test]
    async fn test_e2e_sink_resolves_unreconciled_datastream() {
        let topology = topology();
        let client = client(MockStore::new());
        let sink = StoreSink::new(Arc::clone(&client), Arc::new(topology.graph.clone()));

        let id = sink.resolve_datastream(&"s2_co2".into()).await.unwrap();
        assert_eq!(client.store().id_of(EntityKind::Datastream, "s2_co2"), Some(id.clone()));
        let created: Vec<EntityKind> = client
            .store()
            .creations()
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(
            created,
            vec![
                EntityKind::Location,
                EntityKind::Thing,
                EntityKind::Sensor,
                EntityKind::ObservedProperty,
                EntityKind::Datastream,
            ]
        );

        client.store().clear_calls();
        assert_eq!(sink.resolve_datastream(&"s2_co2".into()).await.unwrap(), id);
        assert!(client.store().calls().is_empty());
    }
}
