//! Loading shared by every command.

use std::sync::Arc;

use anyhow::{Context, Result};
use config_loader::{ConfigLoader, LoadOptions, Topology};
use contracts::EngineSettings;
use secrecy::SecretString;
use store_client::{FrostStore, StoreClient};
use tracing::{info, warn};

use crate::cli::{ConfigArgs, StoreArgs};

/// Load engine settings, then apply flag and environment overrides
pub fn load_settings(config: &ConfigArgs, store: Option<&StoreArgs>) -> Result<EngineSettings> {
    let mut settings = ConfigLoader::load_settings_or_default(&config.config)
        .with_context(|| format!("Failed to load settings from {}", config.config.display()))?;

    if let Some(dir) = &config.sensors_dir {
        settings.sensors_dir = dir.clone();
    }
    if let Some(store) = store {
        if let Some(endpoint) = &store.endpoint {
            settings.store.endpoint = endpoint.clone();
        }
        if let Some(user) = &store.user {
            settings.store.user = user.clone();
        }
    }
    config_loader::validate_settings(&settings).context("Invalid settings after overrides")?;

    info!(
        config = %config.config.display(),
        sensors_dir = %settings.sensors_dir.display(),
        endpoint = %settings.store.endpoint,
        "Settings loaded"
    );
    Ok(settings)
}

/// Load and merge every sensor document in the configured directory
pub fn load_topology(settings: &EngineSettings, config: &ConfigArgs) -> Result<Topology> {
    let options = LoadOptions {
        skip_invalid: config.skip_invalid,
    };
    let topology = ConfigLoader::load_topology(&settings.sensors_dir, options).with_context(|| {
        format!(
            "Failed to load sensor documents from {}",
            settings.sensors_dir.display()
        )
    })?;

    for invalid in &topology.invalid_documents {
        warn!(
            path = %invalid.path.display(),
            reason = %invalid.reason,
            "Skipped invalid sensor document"
        );
    }
    observability::record_config_failures(topology.invalid_documents.len());

    info!(
        documents = topology.documents.len(),
        invalid = topology.invalid_documents.len(),
        templates = topology.skipped_templates.len(),
        entities = topology.graph.len(),
        sensors = topology.sensors.len(),
        "Sensor documents loaded"
    );
    Ok(topology)
}

/// Build the HTTP store client
pub fn store_client(
    settings: &EngineSettings,
    store: &StoreArgs,
) -> Result<Arc<StoreClient<FrostStore>>> {
    let password = store.password.clone().map(SecretString::from);
    let frost = FrostStore::new(
        &settings.store.endpoint,
        settings.store.user.clone(),
        password,
        settings.store.request_timeout(),
    )
    .context("Failed to build store client")?;
    Ok(Arc::new(StoreClient::new(
        frost,
        settings.store.request_timeout(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigArgs {
            config: dir.path().join("absent.toml"),
            sensors_dir: Some(PathBuf::from("docs")),
            skip_invalid: false,
        };
        let store = StoreArgs {
            endpoint: Some("https://frost.example.org/FROST-Server/v1.1".into()),
            user: Some("ingest".into()),
            password: None,
        };
        let settings = load_settings(&config, Some(&store)).unwrap();
        assert_eq!(settings.sensors_dir, PathBuf::from("docs"));
        assert_eq!(settings.store.endpoint, "https://frost.example.org/FROST-Server/v1.1");
        assert_eq!(settings.store.user, "ingest");
    }

    #[test]
    fn test_invalid_endpoint_override_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigArgs {
            config: dir.path().join("absent.toml"),
            sensors_dir: None,
            skip_invalid: false,
        };
        let store = StoreArgs {
            endpoint: Some("ftp://frost".into()),
            user: None,
            password: None,
        };
        assert!(load_settings(&config, Some(&store)).is_err());
    }
}
