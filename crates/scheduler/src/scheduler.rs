//! StreamScheduler - one independent task per configured sensor

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    EntityGraph, EntityName, ErrorClass, ObservationSink, ReadingBatch, ReadingCallback,
    SchedulerSettings, SourceAdapter, SourceError,
};
use ingestion::TransformMapper;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::Backoff;
use crate::error::{Result, SchedulerError};
use crate::handle::{SensorHandle, SensorStatus};
use crate::metrics::SensorTaskMetrics;
use crate::routes::SensorRoutes;
use crate::state::TaskState;
use crate::task::{SensorTask, TaskInput};

const FAILURE_EVENT_CAPACITY: usize = 256;

/// A recorded streaming failure
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub sensor: EntityName,
    /// Short label, e.g. `auth_expired`, `remote_rejected`, `transform`
    pub kind: String,
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Final state of every task after shutdown
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSummary {
    pub sensors: Vec<SensorStatus>,
    /// Tasks still running at the grace deadline
    pub aborted: Vec<EntityName>,
    pub uptime: Duration,
}

/// Per-sensor stream scheduler
///
/// Tasks share nothing but the sink: one sensor failing, backing off or
/// being aborted never affects another.
pub struct StreamScheduler<K: ObservationSink + Send + Sync + 'static> {
    sink: Arc<K>,
    graph: Arc<EntityGraph>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
    failures: broadcast::Sender<FailureEvent>,
    tasks: Vec<SensorHandle>,
    started: tokio::time::Instant,
}

impl<K: ObservationSink + Send + Sync + 'static> StreamScheduler<K> {
    pub fn new(sink: Arc<K>, graph: Arc<EntityGraph>, settings: SchedulerSettings) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_EVENT_CAPACITY);
        Self {
            sink,
            graph,
            settings,
            cancel: CancellationToken::new(),
            failures,
            tasks: Vec::new(),
            started: tokio::time::Instant::now(),
        }
    }

    /// Start the task for one sensor
    ///
    /// Subscribing sources are subscribed here; their callback only hands
    /// readings to the task.
    #[instrument(
        name = "scheduler_spawn",
        skip(self, adapter, mapper),
        fields(sensor = %adapter.sensor())
    )]
    pub fn spawn(&mut self, adapter: SourceAdapter, mapper: TransformMapper) -> Result<()> {
        let sensor = adapter.sensor().clone();
        if self.graph.sensor(&sensor).is_none() {
            return Err(SchedulerError::UnknownSensor { sensor });
        }
        if self.tasks.iter().any(|t| *t.sensor() == sensor) {
            return Err(SchedulerError::DuplicateSensor { sensor });
        }

        let routes = SensorRoutes::from_graph(&self.graph, &sensor);
        if routes.is_empty() {
            warn!(
                sensor = %sensor,
                "sensor has no Datastreams, every observation will be unrouted"
            );
        }
        let metrics = Arc::new(SensorTaskMetrics::new());
        let (state_tx, state_rx) = watch::channel(TaskState::Idle);

        let (input, subscription) = match adapter {
            SourceAdapter::Polling(source) => (TaskInput::Polling(source), None),
            SourceAdapter::Subscribing(source) => {
                let (tx, rx) = async_channel::bounded(self.settings.subscription_buffer.max(1));
                source.subscribe(handoff_callback(sensor.clone(), tx, Arc::clone(&metrics)));
                (TaskInput::Subscribing(rx), Some(source))
            }
        };

        let task = SensorTask {
            sensor: sensor.clone(),
            mapper,
            routes,
            sink: Arc::clone(&self.sink),
            settings: self.settings.clone(),
            metrics: Arc::clone(&metrics),
            state: state_tx,
            failures: self.failures.clone(),
            cancel: self.cancel.child_token(),
            pending: VecDeque::new(),
            backoff: Backoff::from_settings(&self.settings),
            fetch_backoff: Backoff::from_settings(&self.settings),
        };
        let join = tokio::spawn(task.run(input));

        debug!(sensor = %sensor, model = %mapper.model(), "sensor task spawned");
        self.tasks.push(SensorHandle::new(
            sensor,
            mapper.model(),
            state_rx,
            metrics,
            join,
            subscription,
        ));
        Ok(())
    }

    /// Subscribe to recorded failures of every sensor
    pub fn failure_events(&self) -> broadcast::Receiver<FailureEvent> {
        self.failures.subscribe()
    }

    pub fn handle(&self, sensor: &str) -> Option<&SensorHandle> {
        self.tasks.iter().find(|t| *t.sensor() == *sensor)
    }

    pub fn handles(&self) -> &[SensorHandle] {
        &self.tasks
    }

    pub fn statuses(&self) -> Vec<SensorStatus> {
        self.tasks.iter().map(SensorHandle::status).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop every task
    ///
    /// Subscriptions stop first, then tasks are cancelled and awaited until
    /// `grace` runs out; whatever is still running is aborted.
    #[instrument(name = "scheduler_shutdown", skip(self), fields(tasks = self.tasks.len()))]
    pub async fn shutdown(mut self, grace: Duration) -> SchedulerSummary {
        info!(grace_ms = grace.as_millis() as u64, "shutting down sensor tasks");
        for handle in &self.tasks {
            handle.unsubscribe();
        }
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = Vec::new();
        for handle in &mut self.tasks {
            let Some(mut join) = handle.take_join() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(sensor = %handle.sensor(), error = %e, "sensor task panicked"),
                Err(_) => {
                    join.abort();
                    warn!(
                        sensor = %handle.sensor(),
                        "sensor task missed the grace deadline, aborted"
                    );
                    aborted.push(handle.sensor().clone());
                }
            }
        }

        let summary = SchedulerSummary {
            sensors: self.statuses(),
            aborted,
            uptime: self.uptime(),
        };
        info!(
            stopped = summary.sensors.len() - summary.aborted.len(),
            aborted = summary.aborted.len(),
            "sensor tasks stopped"
        );
        summary
    }
}

/// Non-blocking hand-off from a transport callback to its task
///
/// A full channel drops the newest reading, so the task never falls further
/// behind than the buffer.
fn handoff_callback(
    sensor: EntityName,
    tx: async_channel::Sender<std::result::Result<ReadingBatch, SourceError>>,
    metrics: Arc<SensorTaskMetrics>,
) -> ReadingCallback {
    Arc::new(move |result| match tx.try_send(result) {
        Ok(()) => {}
        Err(async_channel::TrySendError::Full(_)) => {
            metrics.inc_dropped();
            warn!(sensor = %sensor, "hand-off buffer full, dropping newest reading");
        }
        Err(async_channel::TrySendError::Closed(_)) => {
            debug!(sensor = %sensor, "reading delivered after task stopped");
        }
    })
}
