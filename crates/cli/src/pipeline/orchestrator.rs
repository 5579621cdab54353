//! Pipeline orchestrator - coordinates all components.
//!
//! Reconcile first; streaming starts only once every configured entity
//! exists remotely. The health report runs on the orchestrator's own loop,
//! beside the shutdown signal and the optional run duration.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use config_loader::Topology;
use contracts::{EngineSettings, EntityName};
use ingestion::{AdapterFactory, TransformMapper, VendorCredentials};
use observability::HealthReport;
use scheduler::StreamScheduler;
use store_client::{Reconciler, RemoteStore, StoreClient, StoreSink};
use tracing::{error, info, warn};

use super::RunSummary;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub settings: EngineSettings,
    pub topology: Topology,
    /// Stop after this long (None = until the shutdown signal)
    pub duration: Option<Duration>,
    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves or the configured duration elapses
    pub async fn run<S, F>(
        self,
        client: Arc<StoreClient<S>>,
        credentials: VendorCredentials,
        shutdown: F,
    ) -> Result<RunSummary>
    where
        S: RemoteStore + Send + Sync + 'static,
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let PipelineConfig {
            settings,
            topology,
            duration,
            metrics_port,
        } = self.config;
        let Topology {
            graph,
            sensors,
            invalid_documents,
            ..
        } = topology;
        let graph = Arc::new(graph);

        if let Some(port) = metrics_port {
            observability::init_metrics_only(port)?;
        }

        // 1. Reconcile
        info!(entities = graph.len(), endpoint = %client.endpoint(), "Reconciling entity store");
        let reconcile_started = Instant::now();
        let reconciled = Reconciler::new(&client)
            .with_settings(&settings.store)
            .reconcile(&graph)
            .await;
        observability::record_reconcile_duration(reconcile_started.elapsed(), reconciled.is_ok());
        let reconcile = reconciled.context("Reconciliation failed, streaming not started")?;
        info!(
            created = reconcile.created.len(),
            existing = reconcile.existing.len(),
            "Entity store reconciled"
        );

        // 2. Adapters and sensor tasks
        let sink = Arc::new(StoreSink::new(Arc::clone(&client), Arc::clone(&graph)));
        let mut scheduler =
            StreamScheduler::new(sink, Arc::clone(&graph), settings.scheduler.clone());
        let mut factory = AdapterFactory::new(&settings, credentials);
        let mut not_started: Vec<EntityName> = Vec::new();

        for binding in &sensors {
            let mapper = TransformMapper::for_model(binding.metadata.sensor_model);
            let spawned = factory
                .build(binding)
                .map_err(anyhow::Error::from)
                .and_then(|adapter| scheduler.spawn(adapter, mapper).map_err(Into::into));
            if let Err(e) = spawned {
                error!(
                    sensor = %binding.sensor,
                    source = %binding.source,
                    error = format!("{e:#}"),
                    "Sensor not started"
                );
                not_started.push(binding.sensor.clone());
            }
        }
        observability::record_config_failures(not_started.len());
        if scheduler.is_empty() {
            bail!("No sensor could be started ({} configured)", sensors.len());
        }
        info!(
            sensors = scheduler.len(),
            not_started = not_started.len(),
            vendor_sessions = factory.session_count(),
            "Streaming started"
        );

        // 3. Wait, reporting health periodically
        let invalid = invalid_documents.len() + not_started.len();
        let interval = settings.monitor.report_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping sensor tasks...");
                    break;
                }
                _ = &mut deadline => {
                    info!("Run duration reached, stopping sensor tasks...");
                    break;
                }
                _ = ticker.tick() => {
                    let statuses = scheduler.statuses();
                    HealthReport::collect(scheduler.uptime(), &statuses, invalid, Utc::now()).log();
                }
            }
        }

        // 4. Shutdown
        let stopped = scheduler
            .shutdown(settings.scheduler.shutdown_grace())
            .await;
        let health = HealthReport::collect(stopped.uptime, &stopped.sensors, invalid, Utc::now());
        health.log();

        Ok(RunSummary {
            reconcile,
            health,
            not_started,
            aborted: stopped.aborted,
            duration: started.elapsed(),
        })
    }
}
