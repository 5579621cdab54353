//! Scheduler error types

use contracts::{ContractError, EntityName};
use thiserror::Error;

/// Errors raised while wiring sensor tasks; streaming failures never surface here
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The sensor is not part of the reconciled graph
    #[error("sensor '{sensor}' is not declared in the entity graph")]
    UnknownSensor { sensor: EntityName },

    /// A task for this sensor is already running
    #[error("sensor '{sensor}' already has a running task")]
    DuplicateSensor { sensor: EntityName },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Scheduler Result type alias
pub type Result<T> = std::result::Result<T, SchedulerError>;
