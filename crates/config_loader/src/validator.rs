//! Configuration validation
//!
//! Document rules (checked per file, before merging):
//! - exactly one sensor, keyed by its own name
//! - name / description / definition / encoding fields within 1..=255 characters
//! - network metadata names an application and a host the sensor model can use
//!
//! Settings rules:
//! - endpoint is an absolute http(s) URL
//! - every interval, timeout and buffer is positive
//! - initial_backoff <= max_backoff, multiplier >= 1, jitter in [0, 1)
//!
//! Cross-document rules (dangling references, Datastream cardinality) live on
//! the merged graph, since a reference may be satisfied by a sibling document.

use contracts::{ContractError, EngineSettings, Entity, SensorDocument};
use validator::ValidationErrors;

/// Validate one sensor document.
///
/// Returns the first error encountered, or Ok(()).
pub fn validate_document(doc: &SensorDocument, source: &str) -> Result<(), ContractError> {
    validate_single_sensor(doc, source)?;
    validate_entity_fields(doc, source)?;
    validate_network_metadata(doc, source)?;
    Ok(())
}

fn validate_single_sensor(doc: &SensorDocument, source: &str) -> Result<(), ContractError> {
    if doc.sensors.len() != 1 {
        return Err(ContractError::config_validation(
            format!("{source}: sensors"),
            format!("expected exactly one sensor, found {}", doc.sensors.len()),
        ));
    }
    for (key, sensor) in &doc.sensors {
        if sensor.name != *key {
            return Err(ContractError::config_validation(
                format!("{source}: sensors.{key}.name"),
                format!("sensor name '{}' does not match its key '{key}'", sensor.name),
            ));
        }
    }
    Ok(())
}

fn validate_entity_fields(doc: &SensorDocument, source: &str) -> Result<(), ContractError> {
    for entity in doc.entities() {
        if let Err(errors) = entity.validate_fields() {
            return Err(field_error(source, &entity, &errors));
        }
    }
    Ok(())
}

fn field_error(source: &str, entity: &Entity, errors: &ValidationErrors) -> ContractError {
    let mut fields: Vec<String> = errors.field_errors().keys().map(|k| k.to_string()).collect();
    fields.sort_unstable();
    ContractError::config_validation(
        format!(
            "{source}: {}.{}",
            entity.kind().section(),
            entity.name()
        ),
        format!(
            "fields must be 1..=255 characters: {}",
            fields.join(", ")
        ),
    )
}

fn validate_network_metadata(doc: &SensorDocument, source: &str) -> Result<(), ContractError> {
    let meta = &doc.network_metadata;
    if meta.application_name.trim().is_empty() {
        return Err(ContractError::config_validation(
            format!("{source}: networkMetadata.application_name"),
            "must not be empty",
        ));
    }
    if !meta.sensor_model.accepts_host(meta.host.trim()) {
        return Err(ContractError::config_validation(
            format!("{source}: networkMetadata.host"),
            format!(
                "host '{}' cannot serve sensor model {}",
                meta.host, meta.sensor_model
            ),
        ));
    }
    Ok(())
}

/// Validate engine settings
pub fn validate_settings(settings: &EngineSettings) -> Result<(), ContractError> {
    validate_store(settings)?;
    validate_scheduler(settings)?;
    validate_monitor(settings)?;
    Ok(())
}

fn validate_store(settings: &EngineSettings) -> Result<(), ContractError> {
    let store = &settings.store;
    let url = url::Url::parse(&store.endpoint).map_err(|e| {
        ContractError::config_validation("store.endpoint", format!("invalid URL: {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ContractError::config_validation(
            "store.endpoint",
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    positive("store.request_timeout_secs", store.request_timeout_secs)?;
    positive(
        "store.reconcile_max_attempts",
        u64::from(store.reconcile_max_attempts),
    )?;
    Ok(())
}

fn validate_scheduler(settings: &EngineSettings) -> Result<(), ContractError> {
    let s = &settings.scheduler;
    positive("scheduler.poll_interval_secs", s.poll_interval_secs)?;
    positive("scheduler.initial_backoff_ms", s.initial_backoff_ms)?;
    positive("scheduler.fetch_timeout_secs", s.fetch_timeout_secs)?;
    positive("scheduler.shutdown_grace_secs", s.shutdown_grace_secs)?;
    positive(
        "scheduler.max_pending_observations",
        s.max_pending_observations as u64,
    )?;
    positive("scheduler.subscription_buffer", s.subscription_buffer as u64)?;

    if s.initial_backoff_ms > s.max_backoff_ms {
        return Err(ContractError::config_validation(
            "scheduler.initial_backoff_ms",
            format!(
                "initial_backoff_ms ({}) must be <= max_backoff_ms ({})",
                s.initial_backoff_ms, s.max_backoff_ms
            ),
        ));
    }
    if s.backoff_multiplier.is_nan() || s.backoff_multiplier < 1.0 {
        return Err(ContractError::config_validation(
            "scheduler.backoff_multiplier",
            "must be >= 1.0",
        ));
    }
    if !(0.0..1.0).contains(&s.backoff_jitter) {
        return Err(ContractError::config_validation(
            "scheduler.backoff_jitter",
            "must be in [0.0, 1.0)",
        ));
    }
    Ok(())
}

fn validate_monitor(settings: &EngineSettings) -> Result<(), ContractError> {
    positive(
        "monitor.report_interval_secs",
        settings.monitor.report_interval_secs,
    )?;
    if settings.monitor.metrics_port == Some(0) {
        return Err(ContractError::config_validation(
            "monitor.metrics_port",
            "must be > 0",
        ));
    }
    Ok(())
}

fn positive(field: &str, value: u64) -> Result<(), ContractError> {
    if value == 0 {
        return Err(ContractError::config_validation(field, "must be > 0"));
    }
    Ok(())
}
