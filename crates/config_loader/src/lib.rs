//! # Config Loader
//!
//! Configuration loading and topology building.
//!
//! Responsibilities:
//! - Parse engine settings (TOML/JSON) and sensor documents (YAML/JSON)
//! - Validate each document, then merge all of them into one `EntityGraph`
//! - Validate the merged graph before anything talks to the network
//!
//! # Example
//!
//! ```no_run
//! use config_loader::{ConfigLoader, LoadOptions};
//! use std::path::Path;
//!
//! let topology = ConfigLoader::load_topology(Path::new("sensor_configs"), LoadOptions::default()).unwrap();
//! println!("{} entities, {} sensors", topology.graph.len(), topology.sensors.len());
//! ```

mod builder;
mod parser;
mod validator;

pub use builder::{GraphBuilder, InvalidDocument, Topology};
pub use parser::ConfigFormat;
pub use validator::{validate_document, validate_settings};

use contracts::{ContractError, EngineSettings, SensorDocument};
use std::path::{Path, PathBuf};

/// Marker in a file name that excludes it from loading
pub const TEMPLATE_MARKER: &str = "template";

/// Topology loading options
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Skip documents that fail to parse or validate instead of failing.
    /// Merge conflicts and graph validation errors are always fatal.
    pub skip_invalid: bool,
}

/// Documents found in a sensor directory
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub documents: Vec<PathBuf>,
    pub skipped_templates: Vec<PathBuf>,
}

/// Configuration loader
///
/// Provides static methods to load settings, documents and whole topologies.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load engine settings from file path (.toml / .json)
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_settings(path: &Path) -> Result<EngineSettings, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::settings_from_str(&content, format)
    }

    /// Like [`ConfigLoader::load_settings`], but a missing file yields defaults
    pub fn load_settings_or_default(path: &Path) -> Result<EngineSettings, ContractError> {
        if path.exists() {
            Self::load_settings(path)
        } else {
            let settings = EngineSettings::default();
            validator::validate_settings(&settings)?;
            Ok(settings)
        }
    }

    /// Parse and validate engine settings from a string
    pub fn settings_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<EngineSettings, ContractError> {
        let settings: EngineSettings = parser::parse(content, format)?;
        validator::validate_settings(&settings)?;
        Ok(settings)
    }

    /// Serialize engine settings to TOML
    pub fn settings_to_toml(settings: &EngineSettings) -> Result<String, ContractError> {
        toml::to_string_pretty(settings)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Load and validate one sensor document (.yaml / .yml / .json)
    pub fn load_document(path: &Path) -> Result<SensorDocument, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::document_from_str(&content, format, &path.display().to_string())
    }

    /// Parse and validate one sensor document from a string
    pub fn document_from_str(
        content: &str,
        format: ConfigFormat,
        source: &str,
    ) -> Result<SensorDocument, ContractError> {
        let doc: SensorDocument = parser::parse(content, format).map_err(|e| match e {
            ContractError::ConfigParse { message, source: cause } => ContractError::ConfigParse {
                message: format!("{source}: {message}"),
                source: cause,
            },
            other => other,
        })?;
        validator::validate_document(&doc, source)?;
        Ok(doc)
    }

    /// List sensor documents in `dir`, sorted, leaving out templates
    pub fn discover_documents(dir: &Path) -> Result<Discovery, ContractError> {
        let mut discovery = Discovery::default();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || !Self::is_document(&path) {
                continue;
            }
            if Self::is_template(&path) {
                discovery.skipped_templates.push(path);
            } else {
                discovery.documents.push(path);
            }
        }
        discovery.documents.sort();
        discovery.skipped_templates.sort();
        Ok(discovery)
    }

    /// Load every document in `dir` and build the merged, validated topology
    ///
    /// # Errors
    /// - directory read failure
    /// - no usable document
    /// - document parse or validation failure (unless `skip_invalid`)
    /// - merge conflict or graph validation failure
    pub fn load_topology(dir: &Path, options: LoadOptions) -> Result<Topology, ContractError> {
        let discovery = Self::discover_documents(dir)?;
        let mut builder = GraphBuilder::new();
        let mut documents = Vec::new();
        let mut invalid_documents = Vec::new();

        for path in discovery.documents {
            let source = path.display().to_string();
            let loaded = Self::load_document(&path);
            let doc = match loaded {
                Ok(doc) => doc,
                Err(e) if options.skip_invalid => {
                    invalid_documents.push(InvalidDocument {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };
            builder.add_document(&source, doc)?;
            documents.push(path);
        }

        if documents.is_empty() {
            return Err(ContractError::config_validation(
                dir.display().to_string(),
                "no usable sensor documents found",
            ));
        }

        let (graph, sensors) = builder.build()?;
        Ok(Topology {
            graph,
            sensors,
            documents,
            invalid_documents,
            skipped_templates: discovery.skipped_templates,
        })
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse(format!(
                "cannot determine file format of '{}' from extension",
                path.display()
            ))
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        std::fs::read_to_string(path).map_err(|e| {
            ContractError::config_parse_with(format!("cannot read '{}'", path.display()), e)
        })
    }

    fn is_document(path: &Path) -> bool {
        matches!(
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(ConfigFormat::from_extension),
            Some(ConfigFormat::Yaml | ConfigFormat::Json)
        )
    }

    fn is_template(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.to_lowercase().contains(TEMPLATE_MARKER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::EntityKind;
    use std::fs;

    fn sensor_doc(sensor: &str, lon: &str) -> String {
        format!(
            r#"
sensors:
  {sensor}:
    name: {sensor}
    description: Netatmo indoor station
    encodingType: application/pdf
    iot_links:
      datastreams: [{sensor}_temperature]
things:
  Desk_{sensor}:
    name: Desk_{sensor}
    description: Lab desk
    iot_links:
      datastreams: [{sensor}_temperature]
      locations: [Room120]
locations:
  Room120:
    name: Room120
    description: Lab room
    location: {{type: Point, coordinates: [{lon}, 52.00]}}
    iot_links:
      things: [Desk_{sensor}]
datastreams:
  {sensor}_temperature:
    name: {sensor}_temperature
    description: Indoor temperature
    observationType: OM_Measurement
    unitOfMeasurement: {{name: degree Celsius, symbol: degC}}
    properties: {{stream: temperature_indoor}}
    iot_links:
      sensors: [{sensor}]
      things: [Desk_{sensor}]
      observedProperties: [temperature]
observedProperties:
  temperature:
    name: temperature
    description: Air temperature
    definition: http://vocab.nerc.ac.uk/collection/P07/current/CFSN0023/
networkMetadata:
  sensor_model: netatmo.nws03
  application_name: lab-weather
  host: netatmo
"#
        )
    }

    #[test]
    fn test_load_topology_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), sensor_doc("s1", "4.37")).unwrap();
        fs::write(dir.path().join("b.yml"), sensor_doc("s2", "4.37")).unwrap();
        fs::write(dir.path().join("template_netatmo.nws03.yaml"), "not: [valid").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let topology = ConfigLoader::load_topology(dir.path(), LoadOptions::default()).unwrap();
        assert_eq!(topology.documents.len(), 2);
        assert_eq!(topology.skipped_templates.len(), 1);
        assert_eq!(topology.graph.count(EntityKind::Location), 1);
        assert_eq!(topology.sensors.len(), 2);
        assert!(topology.binding("s2").is_some());
    }

    #[test]
    fn test_conflict_is_fatal_even_when_skipping() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), sensor_doc("s1", "4.37")).unwrap();
        fs::write(dir.path().join("b.yaml"), sensor_doc("s2", "4.38")).unwrap();

        let options = LoadOptions { skip_invalid: true };
        let err = ConfigLoader::load_topology(dir.path(), options).unwrap_err();
        assert!(matches!(err, ContractError::DuplicateConflict { .. }), "{err}");
    }

    #[test]
    fn test_skip_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), sensor_doc("s1", "4.37")).unwrap();
        fs::write(dir.path().join("broken.yaml"), "sensors: [").unwrap();

        let err = ConfigLoader::load_topology(dir.path(), LoadOptions::default());
        assert!(err.is_err());

        let topology =
            ConfigLoader::load_topology(dir.path(), LoadOptions { skip_invalid: true }).unwrap();
        assert_eq!(topology.documents.len(), 1);
        assert_eq!(topology.invalid_documents.len(), 1);
        assert!(topology.invalid_documents[0].path.ends_with("broken.yaml"));
    }

    #[test]
    fn test_empty_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::load_topology(dir.path(), LoadOptions::default()).is_err());
    }

    #[test]
    fn test_settings_round_trip_toml() {
        let mut settings = EngineSettings::default();
        settings.scheduler.poll_interval_secs = 60;
        settings.monitor.metrics_port = Some(9000);
        let toml = ConfigLoader::settings_to_toml(&settings).unwrap();
        let parsed = ConfigLoader::settings_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_missing_settings_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            ConfigLoader::load_settings_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = ConfigLoader::settings_from_str(
            "[scheduler]\nbackoff_multiplier = 0.5\n",
            ConfigFormat::Toml,
        );
        assert!(matches!(result, Err(ContractError::ConfigValidation { .. })));
    }
}
