//! Ingestion error types

use contracts::{ContractError, EntityName, SensorModel};
use thiserror::Error;

/// Adapter construction error
///
/// Runtime upstream failures are `contracts::SourceError`; these only occur
/// while wiring a sensor to its vendor.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// No usable credentials for a vendor application
    #[error("no credentials for application '{application}': {message}")]
    Credentials {
        /// Application name from the sensor's network metadata
        application: String,
        message: String,
    },

    /// Credential JSON could not be read
    #[error("malformed {variable}: {message}")]
    CredentialFormat { variable: String, message: String },

    /// The host in the network metadata does not serve this model
    #[error("sensor '{sensor}' ({model}) cannot be read from host '{host}'")]
    UnsupportedHost {
        sensor: EntityName,
        model: SensorModel,
        host: String,
    },

    /// HTTP or MQTT client could not be set up
    #[error("failed to build client for application '{application}': {message}")]
    ClientSetup { application: String, message: String },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl IngestionError {
    pub fn credentials(application: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Credentials {
            application: application.into(),
            message: message.into(),
        }
    }

    pub fn client_setup(application: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClientSetup {
            application: application.into(),
            message: message.into(),
        }
    }
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;
