//! Adapter factory - sensor bindings to source adapters
//!
//! Vendor sessions are shared per application: every Netatmo station of an
//! application polls through one `NetatmoAccount`, every TTS device of an
//! application rides one MQTT connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contracts::{EngineSettings, SensorBinding, SourceAdapter, TransportShape, VendorSettings};
use tracing::{debug, info};

use crate::adapters::{NetatmoAccount, NetatmoSource, TtsApplication, TtsSource};
use crate::credentials::VendorCredentials;
use crate::error::{IngestionError, Result};

pub struct AdapterFactory {
    vendors: VendorSettings,
    credentials: VendorCredentials,
    fetch_timeout: Duration,
    netatmo: HashMap<String, Arc<NetatmoAccount>>,
    tts: HashMap<(String, String), Arc<TtsApplication>>,
}

impl AdapterFactory {
    pub fn new(settings: &EngineSettings, credentials: VendorCredentials) -> Self {
        Self {
            vendors: settings.vendors.clone(),
            credentials,
            fetch_timeout: settings.scheduler.fetch_timeout(),
            netatmo: HashMap::new(),
            tts: HashMap::new(),
        }
    }

    /// Build the adapter reading `binding`'s sensor
    ///
    /// # Errors
    /// `UnsupportedHost` when the host does not serve the model, `Credentials`
    /// when the application has no credentials.
    pub fn build(&mut self, binding: &SensorBinding) -> Result<SourceAdapter> {
        let meta = &binding.metadata;
        if !meta.sensor_model.accepts_host(&meta.host) {
            return Err(IngestionError::UnsupportedHost {
                sensor: binding.sensor.clone(),
                model: meta.sensor_model,
                host: meta.host.clone(),
            });
        }

        let adapter = match meta.sensor_model.transport() {
            TransportShape::Polling => {
                let account = self.netatmo_account(&meta.application_name)?;
                let source = NetatmoSource::new(binding.sensor.clone(), account);
                SourceAdapter::Polling(Box::new(source))
            }
            TransportShape::Subscribing => {
                let application = self.tts_application(&meta.application_name, &meta.host)?;
                SourceAdapter::Subscribing(Box::new(TtsSource::new(
                    binding.sensor.clone(),
                    application,
                )))
            }
        };
        debug!(
            sensor = %binding.sensor,
            model = %meta.sensor_model,
            application = %meta.application_name,
            "adapter built"
        );
        Ok(adapter)
    }

    fn netatmo_account(&mut self, application: &str) -> Result<Arc<NetatmoAccount>> {
        if let Some(account) = self.netatmo.get(application) {
            return Ok(Arc::clone(account));
        }
        let creds = self.credentials.netatmo(application)?;
        let account = Arc::new(NetatmoAccount::new(
            application,
            &self.vendors.netatmo,
            &creds,
            self.fetch_timeout,
        )?);
        info!(application = %application, "netatmo account configured");
        self.netatmo
            .insert(application.to_string(), Arc::clone(&account));
        Ok(account)
    }

    fn tts_application(&mut self, application: &str, host: &str) -> Result<Arc<TtsApplication>> {
        let key = (application.to_string(), host.to_string());
        if let Some(app) = self.tts.get(&key) {
            return Ok(Arc::clone(app));
        }
        let creds = self.credentials.tts(application)?;
        let app = Arc::new(TtsApplication::new(application, host, &self.vendors.tts, &creds));
        info!(application = %application, host = %host, "TTS application configured");
        self.tts.insert(key, Arc::clone(&app));
        Ok(app)
    }

    /// Distinct vendor sessions built so far
    pub fn session_count(&self) -> usize {
        self.netatmo.len() + self.tts.len()
    }
}
