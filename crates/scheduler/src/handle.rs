//! SensorHandle - the scheduler's grip on one running sensor task

use std::sync::Arc;

use contracts::{EntityName, SensorModel, SubscribingSource, TransportShape};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::metrics::{MetricsSnapshot, SensorTaskMetrics};
use crate::state::TaskState;

/// Handle to a running sensor task
pub struct SensorHandle {
    sensor: EntityName,
    model: SensorModel,
    shape: TransportShape,
    state: watch::Receiver<TaskState>,
    metrics: Arc<SensorTaskMetrics>,
    join: Option<JoinHandle<()>>,
    /// Kept so shutdown can stop deliveries before cancelling the task
    subscription: Option<Box<dyn SubscribingSource>>,
}

impl SensorHandle {
    pub(crate) fn new(
        sensor: EntityName,
        model: SensorModel,
        state: watch::Receiver<TaskState>,
        metrics: Arc<SensorTaskMetrics>,
        join: JoinHandle<()>,
        subscription: Option<Box<dyn SubscribingSource>>,
    ) -> Self {
        let shape = if subscription.is_some() {
            TransportShape::Subscribing
        } else {
            TransportShape::Polling
        };
        Self {
            sensor,
            model,
            shape,
            state,
            metrics,
            join: Some(join),
            subscription,
        }
    }

    pub fn sensor(&self) -> &EntityName {
        &self.sensor
    }

    pub fn model(&self) -> SensorModel {
        self.model
    }

    pub fn shape(&self) -> TransportShape {
        self.shape
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition
    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    pub fn metrics(&self) -> &Arc<SensorTaskMetrics> {
        &self.metrics
    }

    /// Whether the task is still executing
    pub fn is_alive(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus {
            sensor: self.sensor.clone(),
            model: self.model,
            state: self.state(),
            alive: self.is_alive(),
            metrics: self.metrics.snapshot(),
        }
    }

    pub(crate) fn unsubscribe(&self) {
        if let Some(source) = &self.subscription {
            source.unsubscribe();
        }
    }

    pub(crate) fn take_join(&mut self) -> Option<JoinHandle<()>> {
        self.join.take()
    }
}

impl std::fmt::Debug for SensorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorHandle")
            .field("sensor", &self.sensor)
            .field("model", &self.model)
            .field("shape", &self.shape)
            .field("state", &self.state())
            .finish()
    }
}

/// Reportable view of one sensor task
#[derive(Debug, Clone, Serialize)]
pub struct SensorStatus {
    pub sensor: EntityName,
    pub model: SensorModel,
    pub state: TaskState,
    /// False once the task has returned, panicked or been aborted
    pub alive: bool,
    pub metrics: MetricsSnapshot,
}
