//! Sensor task - the per-sensor state machine
//!
//! Both transport shapes feed the same loop body: readings are transformed,
//! appended to a FIFO of unacknowledged observations and drained one
//! submission at a time. A retryable submit failure keeps the head in place
//! and schedules a retry; until it is due the task keeps taking readings,
//! queued behind the head.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use contracts::{
    EntityName, ErrorClass, Observation, ObservationSink, PollingSource, ReadingBatch,
    SchedulerSettings, SourceError, SubmitError,
};
use ingestion::TransformMapper;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;
use crate::metrics::SensorTaskMetrics;
use crate::routes::SensorRoutes;
use crate::scheduler::FailureEvent;
use crate::state::TaskState;

/// Where a task's readings come from
pub(crate) enum TaskInput {
    Polling(Box<dyn PollingSource>),
    /// Hand-off channel filled by the subscription callback
    Subscribing(async_channel::Receiver<Result<ReadingBatch, SourceError>>),
}

/// What a scheduled retry re-runs once its delay is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Fetch,
    Submit,
}

/// Outcome of draining the pending queue
enum Drain {
    Done,
    /// The head failed with a retryable error and is still queued
    Stalled,
    Cancelled,
}

pub(crate) struct SensorTask<K: ObservationSink> {
    pub(crate) sensor: EntityName,
    pub(crate) mapper: TransformMapper,
    pub(crate) routes: SensorRoutes,
    pub(crate) sink: Arc<K>,
    pub(crate) settings: SchedulerSettings,
    pub(crate) metrics: Arc<SensorTaskMetrics>,
    pub(crate) state: watch::Sender<TaskState>,
    pub(crate) failures: broadcast::Sender<FailureEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) pending: VecDeque<Observation>,
    /// Submission retries; reset by an acknowledged observation
    pub(crate) backoff: Backoff,
    /// Fetch retries; reset by a successful fetch
    pub(crate) fetch_backoff: Backoff,
}

impl<K: ObservationSink> SensorTask<K> {
    #[instrument(name = "sensor_task_loop", skip(self, input), fields(sensor = %self.sensor))]
    pub(crate) async fn run(mut self, input: TaskInput) {
        self.set_state(TaskState::Running);
        info!(model = %self.mapper.model(), routes = self.routes.len(), "sensor task started");

        match input {
            TaskInput::Polling(source) => self.poll_loop(source.as_ref()).await,
            TaskInput::Subscribing(rx) => self.subscription_loop(rx).await,
        }

        self.set_state(TaskState::Stopped);
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "stopping with unsubmitted observations");
        }
        debug!("sensor task stopped");
    }

    async fn poll_loop(&mut self, source: &dyn PollingSource) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry: Option<(Instant, Retry)> = None;

        loop {
            let fired = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                what = retry_due(retry) => Some(what),
                _ = ticker.tick() => None,
            };
            let fetch_now = match fired {
                Some(what) => {
                    retry = None;
                    self.set_state(TaskState::Running);
                    what == Retry::Fetch
                }
                None => true,
            };

            if fetch_now {
                // a tick supersedes a pending fetch retry
                if matches!(retry, Some((_, Retry::Fetch))) {
                    retry = None;
                    self.set_state(TaskState::Running);
                }
                let fetched = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    result = self.fetch(source) => result,
                };
                match fetched {
                    Ok(batch) => {
                        self.fetch_backoff.reset();
                        self.ingest(batch);
                    }
                    Err(e) => match e.class() {
                        ErrorClass::Retryable => {
                            self.record_failure(e.kind(), e.class(), &e);
                            if retry.is_none() {
                                retry = Some(self.schedule_retry(Retry::Fetch));
                            }
                        }
                        ErrorClass::AuthExpired => {
                            self.metrics.inc_auth_failures();
                            metrics::counter!(
                                "sta_ingest_auth_expired_total",
                                "sensor" => self.sensor.to_string()
                            )
                            .increment(1);
                            self.record_failure(e.kind(), e.class(), &e);
                            self.refresh(source).await;
                        }
                        ErrorClass::NonRetryable => self.record_failure(e.kind(), e.class(), &e),
                    },
                }
            }

            // a stalled head waits for its own retry, not the next tick
            if matches!(retry, Some((_, Retry::Submit))) {
                continue;
            }
            match self.drain().await {
                Drain::Done => {}
                Drain::Stalled => retry = Some(self.schedule_retry(Retry::Submit)),
                Drain::Cancelled => break,
            }
        }
    }

    async fn subscription_loop(
        &mut self,
        rx: async_channel::Receiver<Result<ReadingBatch, SourceError>>,
    ) {
        let mut retry: Option<(Instant, Retry)> = None;

        loop {
            let delivered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = retry_due(retry) => None,
                delivered = rx.recv() => Some(delivered),
            };
            match delivered {
                None => {
                    retry = None;
                    self.set_state(TaskState::Running);
                }
                Some(Ok(Ok(batch))) => self.ingest(batch),
                Some(Ok(Err(e))) => {
                    if e.class() == ErrorClass::AuthExpired {
                        self.metrics.inc_auth_failures();
                        metrics::counter!(
                            "sta_ingest_auth_expired_total",
                            "sensor" => self.sensor.to_string()
                        )
                        .increment(1);
                    }
                    self.record_failure(e.kind(), e.class(), &e);
                }
                Some(Err(_)) => {
                    debug!("hand-off channel closed");
                    break;
                }
            }

            if retry.is_some() {
                continue;
            }
            match self.drain().await {
                Drain::Done => {}
                Drain::Stalled => retry = Some(self.schedule_retry(Retry::Submit)),
                Drain::Cancelled => break,
            }
        }
    }

    async fn fetch(&self, source: &dyn PollingSource) -> Result<ReadingBatch, SourceError> {
        let timeout = self.settings.fetch_timeout();
        match tokio::time::timeout(timeout, source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                sensor: self.sensor.to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn refresh(&self, source: &dyn PollingSource) {
        let timeout = self.settings.fetch_timeout();
        match tokio::time::timeout(timeout, source.refresh_credentials()).await {
            Ok(Ok(())) => info!(sensor = %self.sensor, "upstream credentials refreshed"),
            Ok(Err(e)) => warn!(sensor = %self.sensor, error = %e, "credential refresh failed"),
            Err(_) => warn!(
                sensor = %self.sensor,
                timeout_ms = timeout.as_millis() as u64,
                "credential refresh timed out"
            ),
        }
    }

    /// Transform a batch and queue its observations
    fn ingest(&mut self, batch: ReadingBatch) {
        self.metrics.inc_payloads_received();
        metrics::counter!("sta_ingest_payloads_received_total", "sensor" => self.sensor.to_string())
            .increment(1);

        let output = self.mapper.transform(&self.sensor, &batch);
        if !output.errors.is_empty() {
            self.metrics.add_transform_errors(output.errors.len() as u64);
            for err in &output.errors {
                metrics::counter!(
                    "sta_ingest_transform_errors_total",
                    "sensor" => self.sensor.to_string(),
                    "field" => err.field.clone()
                )
                .increment(1);
                self.record_failure("transform", ErrorClass::NonRetryable, err);
            }
        }
        debug!(observations = output.observations.len(), "reading transformed");

        for observation in output.observations {
            if self.pending.len() >= self.settings.max_pending_observations {
                if let Some(dropped) = self.pending.pop_front() {
                    self.metrics.inc_dropped();
                    warn!(
                        sensor = %self.sensor,
                        stream = %dropped.stream,
                        phenomenon_time = %dropped.phenomenon_time,
                        "pending queue full, dropping oldest observation"
                    );
                }
            }
            self.pending.push_back(observation);
        }
        self.publish_pending();
    }

    /// Submit queued observations in order until the queue is empty
    ///
    /// Stops at the first retryable failure with the head still queued.
    /// Cancellation is checked between submissions; one already started
    /// completes.
    async fn drain(&mut self) -> Drain {
        while let Some(observation) = self.pending.front() {
            if self.cancel.is_cancelled() {
                return Drain::Cancelled;
            }
            let Some(datastream) = self.routes.route(&observation.stream).cloned() else {
                let message = format!("no Datastream routed for stream '{}'", observation.stream);
                self.record_failure("unrouted", ErrorClass::NonRetryable, &message);
                self.pending.pop_front();
                continue;
            };

            let started = Instant::now();
            let result = match self.sink.resolve_datastream(&datastream).await {
                Ok(id) => self.sink.submit(&id, observation).await,
                Err(e) => Err(e),
            };
            metrics::histogram!("sta_ingest_submit_latency_ms", "sensor" => self.sensor.to_string())
                .record(started.elapsed().as_secs_f64() * 1_000.0);

            match result {
                Ok(id) => {
                    debug!(datastream = %datastream, id = %id, "observation submitted");
                    self.pending.pop_front();
                    self.metrics.record_push_success(Utc::now());
                    self.backoff.reset();
                    submitted_counter(&self.sensor, "ok");
                }
                Err(e) => {
                    self.metrics.inc_push_fail();
                    match e {
                        SubmitError::Unavailable { .. } => {
                            submitted_counter(&self.sensor, "unavailable");
                            self.record_failure(e.kind(), e.class(), &e);
                            self.publish_pending();
                            return Drain::Stalled;
                        }
                        SubmitError::Rejected { .. } => {
                            submitted_counter(&self.sensor, "rejected");
                            self.metrics.inc_rejected();
                            self.record_failure(e.kind(), e.class(), &e);
                            self.pending.pop_front();
                        }
                    }
                }
            }
            self.publish_pending();
        }
        Drain::Done
    }

    /// Draw the next delay for `what` and enter `BackingOff`
    fn schedule_retry(&mut self, what: Retry) -> (Instant, Retry) {
        let backoff = match what {
            Retry::Fetch => &mut self.fetch_backoff,
            Retry::Submit => &mut self.backoff,
        };
        let delay = backoff.next_delay();
        let attempt = backoff.attempt();

        self.metrics.inc_backoffs();
        metrics::histogram!("sta_ingest_backoff_delay_ms", "sensor" => self.sensor.to_string())
            .record(delay.as_millis() as f64);
        warn!(
            sensor = %self.sensor,
            retry = ?what,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "backing off"
        );
        self.set_state(TaskState::BackingOff);
        (Instant::now() + delay, what)
    }

    fn record_failure(&self, kind: &str, class: ErrorClass, error: &dyn std::fmt::Display) {
        warn!(
            sensor = %self.sensor,
            kind = kind,
            class = class.as_str(),
            attempt = self.backoff.attempt(),
            error = %error,
            "sensor failure"
        );
        // no subscribers is fine
        let _ = self.failures.send(FailureEvent {
            sensor: self.sensor.clone(),
            kind: kind.to_string(),
            class,
            message: error.to_string(),
            at: Utc::now(),
        });
    }

    fn set_state(&self, state: TaskState) {
        self.state.send_replace(state);
    }

    fn publish_pending(&self) {
        self.metrics.set_pending(self.pending.len());
        metrics::gauge!("sta_ingest_pending_observations", "sensor" => self.sensor.to_string())
            .set(self.pending.len() as f64);
    }
}

fn submitted_counter(sensor: &EntityName, status: &'static str) {
    metrics::counter!(
        "sta_ingest_observations_submitted_total",
        "sensor" => sensor.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Resolves when a scheduled retry is due; never without one
async fn retry_due(retry: Option<(Instant, Retry)>) -> Retry {
    match retry {
        Some((at, what)) => {
            tokio::time::sleep_until(at).await;
            what
        }
        None => std::future::pending().await,
    }
}
