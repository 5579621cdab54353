//! Layered error definitions
//!
//! Categorized by source: config / graph / upstream source / remote submission

use thiserror::Error;

use crate::{EntityKind, EntityName};

/// How the scheduler reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Back off and try the same work again
    Retryable,
    /// Record, skip, continue at the next cycle
    NonRetryable,
    /// Upstream credential expired: refresh, then continue at the next cycle
    AuthExpired,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non_retryable",
            Self::AuthExpired => "auth_expired",
        }
    }
}

/// Load-time error: configuration and entity graph
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Graph Errors =====
    /// Same name declared twice with different attributes
    #[error(
        "conflicting declarations of {kind} '{name}' (field '{field}') in '{first_source}' and '{second_source}'"
    )]
    DuplicateConflict {
        kind: EntityKind,
        name: EntityName,
        field: &'static str,
        first_source: String,
        second_source: String,
    },

    /// A named reference has no matching entity in the merged graph
    #[error("{kind} '{name}' has a dangling '{field}' reference: {detail}")]
    DanglingReference {
        kind: EntityKind,
        name: EntityName,
        field: &'static str,
        detail: String,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration parse error keeping the underlying cause
    pub fn config_parse_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Reference to an entity that does not exist
    pub fn missing_reference(
        kind: EntityKind,
        name: &EntityName,
        field: &'static str,
        target: &EntityName,
    ) -> Self {
        Self::DanglingReference {
            kind,
            name: name.clone(),
            field,
            detail: format!("no entity named '{target}'"),
        }
    }

    /// Required reference that was never declared
    pub fn undeclared_reference(kind: EntityKind, name: &EntityName, field: &'static str) -> Self {
        Self::DanglingReference {
            kind,
            name: name.clone(),
            field,
            detail: "no reference declared".to_string(),
        }
    }
}

/// Upstream vendor source error
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Upstream credential expired or was refused
    #[error("auth expired for sensor '{sensor}': {message}")]
    AuthExpired { sensor: String, message: String },

    /// Transient transport failure (connect, reset, 5xx)
    #[error("transport error for sensor '{sensor}': {message}")]
    Transport { sensor: String, message: String },

    /// Upstream call exceeded its ceiling
    #[error("fetch for sensor '{sensor}' timed out after {after_ms}ms")]
    Timeout { sensor: String, after_ms: u64 },

    /// Payload did not have the vendor's expected shape
    #[error("decode error for sensor '{sensor}': {message}")]
    Decode { sensor: String, message: String },

    /// Upstream answered but the device has no data to offer
    #[error("sensor '{sensor}' unavailable: {message}")]
    Unavailable { sensor: String, message: String },
}

impl SourceError {
    pub fn auth_expired(sensor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthExpired {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    pub fn transport(sensor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    pub fn decode(sensor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(sensor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthExpired { .. } => ErrorClass::AuthExpired,
            Self::Transport { .. } | Self::Timeout { .. } => ErrorClass::Retryable,
            Self::Decode { .. } | Self::Unavailable { .. } => ErrorClass::NonRetryable,
        }
    }

    /// Short label for metrics and failure events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthExpired { .. } => "auth_expired",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Decode { .. } => "decode",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Observation submission error, as seen by a sensor task
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// Store unreachable or timed out; safe to retry the same observation
    #[error("remote store unavailable: {message}")]
    Unavailable { message: String },

    /// Store refused the payload; retrying will not help
    #[error("remote store rejected submission{}: {message}", status_suffix(.status))]
    Rejected {
        status: Option<u16>,
        message: String,
    },
}

impl SubmitError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable { .. } => ErrorClass::Retryable,
            Self::Rejected { .. } => ErrorClass::NonRetryable,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "remote_unavailable",
            Self::Rejected { .. } => "remote_rejected",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}
