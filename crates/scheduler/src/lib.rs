//! # Scheduler
//!
//! Per-sensor streaming.
//!
//! Responsibilities:
//! - One task per sensor, driven by its polling interval or subscription
//! - Ordered, single-flight submission to the observation sink
//! - Exponential backoff with jitter on retryable failures
//! - Bounded buffering: oldest-drop for pending observations, newest-drop
//!   for the subscription hand-off
//! - Graceful shutdown with an abort deadline
//!
//! A failing sensor never affects another sensor's task.

mod backoff;
mod error;
mod handle;
mod metrics;
mod routes;
mod scheduler;
mod state;
mod task;

pub use backoff::Backoff;
pub use error::{Result, SchedulerError};
pub use handle::{SensorHandle, SensorStatus};
pub use metrics::{MetricsSnapshot, SensorTaskMetrics};
pub use routes::SensorRoutes;
pub use scheduler::{FailureEvent, SchedulerSummary, StreamScheduler};
pub use state::TaskState;
