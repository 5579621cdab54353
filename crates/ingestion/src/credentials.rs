//! Vendor credentials keyed by application name
//!
//! Supplied out of band as JSON in the environment:
//!
//! ```text
//! NETATMO_CREDENTIALS='{"lab-weather": {"CLIENT_ID": "..", "CLIENT_SECRET": "..", "REFRESH_TOKEN": ".."}}'
//! TTS_CREDENTIALS='{"lab-lorawan": {"API_KEY": ".."}}'
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{IngestionError, Result};

pub const NETATMO_CREDENTIALS_ENV: &str = "NETATMO_CREDENTIALS";
pub const TTS_CREDENTIALS_ENV: &str = "TTS_CREDENTIALS";

/// OAuth2 client of one Netatmo application
#[derive(Debug)]
pub struct NetatmoCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Initial refresh token; rotated tokens live in the account
    pub refresh_token: SecretString,
}

/// API key of one The Things Stack application
#[derive(Debug)]
pub struct TtsCredentials {
    pub api_key: SecretString,
}

#[derive(Deserialize)]
struct RawNetatmo {
    #[serde(rename = "CLIENT_ID")]
    client_id: String,
    #[serde(rename = "CLIENT_SECRET")]
    client_secret: String,
    #[serde(rename = "REFRESH_TOKEN")]
    refresh_token: String,
}

#[derive(Deserialize)]
struct RawTts {
    #[serde(rename = "API_KEY")]
    api_key: String,
}

impl From<RawNetatmo> for NetatmoCredentials {
    fn from(raw: RawNetatmo) -> Self {
        Self {
            client_id: raw.client_id,
            client_secret: SecretString::from(raw.client_secret),
            refresh_token: SecretString::from(raw.refresh_token),
        }
    }
}

impl From<RawTts> for TtsCredentials {
    fn from(raw: RawTts) -> Self {
        Self {
            api_key: SecretString::from(raw.api_key),
        }
    }
}

/// Credentials for every configured vendor application
#[derive(Debug, Clone, Default)]
pub struct VendorCredentials {
    netatmo: HashMap<String, Arc<NetatmoCredentials>>,
    tts: HashMap<String, Arc<TtsCredentials>>,
}

impl VendorCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read both variables; an unset variable means no applications of that vendor
    pub fn from_env() -> Result<Self> {
        let netatmo = std::env::var(NETATMO_CREDENTIALS_ENV).ok();
        let tts = std::env::var(TTS_CREDENTIALS_ENV).ok();
        Self::from_json(netatmo.as_deref(), tts.as_deref())
    }

    pub fn from_json(netatmo: Option<&str>, tts: Option<&str>) -> Result<Self> {
        let netatmo = parse_table::<RawNetatmo>(NETATMO_CREDENTIALS_ENV, netatmo)?;
        let tts = parse_table::<RawTts>(TTS_CREDENTIALS_ENV, tts)?;
        Ok(Self {
            netatmo: netatmo
                .into_iter()
                .map(|(app, raw)| (app, Arc::new(raw.into())))
                .collect(),
            tts: tts
                .into_iter()
                .map(|(app, raw)| (app, Arc::new(raw.into())))
                .collect(),
        })
    }

    pub fn with_netatmo(
        mut self,
        application: impl Into<String>,
        creds: NetatmoCredentials,
    ) -> Self {
        self.netatmo.insert(application.into(), Arc::new(creds));
        self
    }

    pub fn with_tts(mut self, application: impl Into<String>, creds: TtsCredentials) -> Self {
        self.tts.insert(application.into(), Arc::new(creds));
        self
    }

    pub fn netatmo(&self, application: &str) -> Result<Arc<NetatmoCredentials>> {
        self.netatmo.get(application).cloned().ok_or_else(|| {
            IngestionError::credentials(
                application,
                format!("not present in {NETATMO_CREDENTIALS_ENV}"),
            )
        })
    }

    pub fn tts(&self, application: &str) -> Result<Arc<TtsCredentials>> {
        self.tts.get(application).cloned().ok_or_else(|| {
            IngestionError::credentials(
                application,
                format!("not present in {TTS_CREDENTIALS_ENV}"),
            )
        })
    }

    /// Application names, sorted, for diagnostics
    pub fn applications(&self) -> Vec<&str> {
        let mut apps: Vec<&str> = self
            .netatmo
            .keys()
            .chain(self.tts.keys())
            .map(String::as_str)
            .collect();
        apps.sort_unstable();
        apps
    }
}

fn parse_table<T: DeserializeOwned>(
    variable: &str,
    json: Option<&str>,
) -> Result<HashMap<String, T>> {
    match json.map(str::trim) {
        None | Some("") => Ok(HashMap::new()),
        Some(json) => {
            serde_json::from_str(json).map_err(|e| IngestionError::CredentialFormat {
                variable: variable.to_string(),
                message: e.to_string(),
            })
        }
    }
}
