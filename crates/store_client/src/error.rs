//! Store client error types

use contracts::{ContractError, EntityKind, EntityName, ErrorClass, SubmitError};
use thiserror::Error;

/// Remote store specific error
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network failure, timeout or 5xx; retryable
    #[error("remote store unavailable during {operation}: {message}")]
    RemoteUnavailable { operation: String, message: String },

    /// The store refused the request (4xx); not retryable
    #[error("remote store rejected {operation}{}: {message}", status_suffix(.status))]
    RemoteRejected {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    /// A creation payload needs a dependency whose remote id is unknown
    #[error("cannot create {kind} '{name}': {dependency_kind} '{dependency}' has no remote id")]
    MissingDependency {
        kind: EntityKind,
        name: EntityName,
        dependency_kind: EntityKind,
        dependency: EntityName,
    },

    /// Reconciliation of one declared entity failed
    #[error("reconciling {kind} '{name}' (declared in {documents}) failed: {source}")]
    EntityFailed {
        kind: EntityKind,
        name: EntityName,
        documents: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Invalid store configuration
    #[error("invalid store configuration: {0}")]
    Config(String),

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl StoreError {
    /// Create remote unavailable error
    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create remote rejected error
    pub fn rejected(
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteRejected {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable { .. })
    }

    /// Innermost error, unwrapping `EntityFailed`
    pub fn root(&self) -> &StoreError {
        match self {
            Self::EntityFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn class(&self) -> ErrorClass {
        if self.is_retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::NonRetryable
        }
    }
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RemoteUnavailable { message, .. } => SubmitError::unavailable(message),
            StoreError::RemoteRejected {
                status, message, ..
            } => SubmitError::rejected(status, message),
            other => SubmitError::rejected(None, other.to_string()),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Result alias
pub type Result<T> = std::result::Result<T, StoreError>;
