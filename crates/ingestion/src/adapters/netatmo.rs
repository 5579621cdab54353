//! Netatmo NWS03 polling adapter
//!
//! One `NetatmoAccount` per vendor application owns the OAuth2 tokens; every
//! station of that application polls through it, so a rotated refresh token
//! is never used twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use contracts::{
    EntityName, FetchFuture, NetatmoSettings, PollingSource, ReadingBatch, RefreshFuture,
    SourceError,
};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::credentials::NetatmoCredentials;
use crate::error::{IngestionError, Result};

/// Body `error.code` values meaning the access token is no longer valid
const TOKEN_ERROR_CODES: [i64; 3] = [2, 3, 26];

struct Tokens {
    access: Option<SecretString>,
    refresh: SecretString,
    /// Bumped by every successful refresh
    generation: u64,
}

#[derive(Deserialize)]
struct TokenReply {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Authenticated session of one Netatmo application
pub struct NetatmoAccount {
    application: String,
    http: reqwest::Client,
    token_url: String,
    data_url: String,
    client_id: String,
    client_secret: SecretString,
    timeout: Duration,
    tokens: RwLock<Tokens>,
}

impl NetatmoAccount {
    pub fn new(
        application: impl Into<String>,
        settings: &NetatmoSettings,
        credentials: &NetatmoCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let application = application.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestionError::client_setup(&application, e.to_string()))?;
        Ok(Self {
            application,
            http,
            token_url: settings.token_url.clone(),
            data_url: settings.data_url.clone(),
            client_id: credentials.client_id.clone(),
            client_secret: SecretString::from(
                credentials.client_secret.expose_secret().to_string(),
            ),
            timeout,
            tokens: RwLock::new(Tokens {
                access: None,
                refresh: SecretString::from(credentials.refresh_token.expose_secret().to_string()),
                generation: 0,
            }),
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Exchange the refresh token for a new access token
    ///
    /// A no-op when another station already replaced the expired token, so
    /// stations of one account that fail together refresh once.
    #[instrument(name = "netatmo_refresh", skip(self), fields(application = %self.application))]
    pub async fn refresh(&self, sensor: &str) -> std::result::Result<(), SourceError> {
        let mut tokens = self.tokens.write().await;
        if tokens.access.is_some() {
            debug!(generation = tokens.generation, "token already refreshed");
            return Ok(());
        }
        let reply = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens.refresh.expose_secret()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| self.request_error(sensor, &e))?;

        let status = reply.status();
        if is_transient(status) {
            return Err(SourceError::transport(
                sensor,
                format!("token endpoint returned {status}"),
            ));
        }
        if !status.is_success() {
            return Err(SourceError::auth_expired(
                sensor,
                format!("token refresh refused ({status})"),
            ));
        }

        let token: TokenReply = reply
            .json()
            .await
            .map_err(|e| SourceError::decode(sensor, format!("token reply: {e}")))?;
        tokens.access = Some(SecretString::from(token.access_token));
        if let Some(refresh) = token.refresh_token {
            tokens.refresh = SecretString::from(refresh);
        }
        tokens.generation += 1;
        info!(generation = tokens.generation, "access token refreshed");
        Ok(())
    }

    /// Current access token and its generation, refreshing when there is none
    async fn access_token(
        &self,
        sensor: &str,
    ) -> std::result::Result<(String, u64), SourceError> {
        {
            let tokens = self.tokens.read().await;
            if let Some(token) = &tokens.access {
                return Ok((token.expose_secret().to_string(), tokens.generation));
            }
        }
        debug!(application = %self.application, "no access token yet, refreshing");
        self.refresh(sensor).await?;
        let tokens = self.tokens.read().await;
        tokens
            .access
            .as_ref()
            .map(|t| (t.expose_secret().to_string(), tokens.generation))
            .ok_or_else(|| SourceError::auth_expired(sensor, "no access token after refresh"))
    }

    /// Drop the access token of `generation`; a newer one is kept
    async fn expire(&self, generation: u64) {
        let mut tokens = self.tokens.write().await;
        if tokens.generation == generation {
            tokens.access = None;
        }
    }

    /// Station data of every device visible to the application
    #[instrument(
        name = "netatmo_station_data",
        skip(self),
        fields(application = %self.application)
    )]
    pub async fn devices(&self, sensor: &str) -> std::result::Result<Vec<Value>, SourceError> {
        let (token, generation) = self.access_token(sensor).await?;
        let reply = self
            .http
            .get(&self.data_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.request_error(sensor, &e))?;

        let status = reply.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.expire(generation).await;
            return Err(SourceError::auth_expired(
                sensor,
                format!("station data returned {status}"),
            ));
        }
        if is_transient(status) {
            return Err(SourceError::transport(
                sensor,
                format!("station data returned {status}"),
            ));
        }

        let body: Value = reply
            .json()
            .await
            .map_err(|e| SourceError::decode(sensor, format!("station data: {e}")))?;
        if let Some(code) = body.pointer("/error/code").and_then(Value::as_i64) {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            if TOKEN_ERROR_CODES.contains(&code) {
                self.expire(generation).await;
                return Err(SourceError::auth_expired(
                    sensor,
                    format!("{message} (code {code})"),
                ));
            }
            return Err(SourceError::decode(sensor, format!("{message} (code {code})")));
        }
        if !status.is_success() {
            return Err(SourceError::decode(
                sensor,
                format!("station data returned {status}"),
            ));
        }

        body.pointer("/body/devices")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| SourceError::decode(sensor, "station data has no body.devices"))
    }

    fn request_error(&self, sensor: &str, err: &reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout {
                sensor: sensor.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            SourceError::transport(sensor, err.to_string())
        }
    }
}

impl std::fmt::Debug for NetatmoAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetatmoAccount")
            .field("application", &self.application)
            .field("data_url", &self.data_url)
            .finish_non_exhaustive()
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Pick this station's dashboard out of the device list
pub fn select_device(
    sensor: &EntityName,
    devices: &[Value],
) -> std::result::Result<ReadingBatch, SourceError> {
    let device = devices
        .iter()
        .find(|d| {
            d.get("_id")
                .and_then(Value::as_str)
                .is_some_and(|id| id.eq_ignore_ascii_case(sensor))
        })
        .ok_or_else(|| {
            SourceError::unavailable(sensor.as_str(), "device not present in station data")
        })?;

    if device.get("reachable").and_then(Value::as_bool) == Some(false) {
        return Err(SourceError::unavailable(sensor.as_str(), "device is not reachable"));
    }

    let dashboard = device
        .get("dashboard_data")
        .and_then(Value::as_object)
        .ok_or_else(|| SourceError::decode(sensor.as_str(), "device has no dashboard_data"))?;

    let mut batch = ReadingBatch::new(sensor.clone());
    batch.phenomenon_time = dashboard
        .get("time_utc")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    batch.fields = dashboard
        .iter()
        .filter(|(key, _)| key.as_str() != "time_utc")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(batch)
}

/// Polling source for one NWS03 station
#[derive(Debug)]
pub struct NetatmoSource {
    sensor: EntityName,
    account: Arc<NetatmoAccount>,
}

impl NetatmoSource {
    pub fn new(sensor: EntityName, account: Arc<NetatmoAccount>) -> Self {
        Self { sensor, account }
    }
}

impl PollingSource for NetatmoSource {
    fn sensor(&self) -> &EntityName {
        &self.sensor
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            let devices = self.account.devices(&self.sensor).await?;
            select_device(&self.sensor, &devices)
        })
    }

    fn refresh_credentials(&self) -> RefreshFuture<'_> {
        Box::pin(async move { self.account.refresh(&self.sensor).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STATION: &str = "70:ee:50:aa:bb:cc";

    fn credentials() -> NetatmoCredentials {
        NetatmoCredentials {
            client_id: "cid".to_string(),
            client_secret: SecretString::from("cs".to_string()),
            refresh_token: SecretString::from("rt-1".to_string()),
        }
    }

    fn source(server: &MockServer) -> NetatmoSource {
        let settings = NetatmoSettings {
            token_url: format!("{}/oauth2/token", server.uri()),
            data_url: format!("{}/api/getstationsdata", server.uri()),
        };
        let account =
            NetatmoAccount::new("lab-weather", &settings, &credentials(), Duration::from_secs(5))
                .unwrap();
        NetatmoSource::new(STATION.into(), Arc::new(account))
    }

    fn station_data(reachable: bool) -> Value {
        json!({
            "status": "ok",
            "body": {"devices": [
                {"_id": "70:ee:50:00:00:01", "reachable": true, "dashboard_data": {"Temperature": 5.0}},
                {
                    "_id": STATION,
                    "reachable": reachable,
                    "dashboard_data": {
                        "time_utc": 1740830400,
                        "Temperature": 21.4,
                        "CO2": 612,
                        "temp_trend": "stable"
                    }
                }
            ]}
        })
    }

    async fn mount_token(server: &MockServer, access: &str) {
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access,
                "refresh_token": "rt-2",
                "expires_in": 10800
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_selects_station() {
        let server = MockServer::start().await;
        mount_token(&server, "at-1").await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(station_data(true)))
            .expect(2)
            .mount(&server)
            .await;

        let source = source(&server);
        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.sensor, STATION);
        assert_eq!(batch.fields["Temperature"], json!(21.4));
        assert!(!batch.fields.contains_key("time_utc"));
        assert_eq!(
            batch.phenomenon_time.unwrap().to_rfc3339(),
            "2025-03-01T12:00:00+00:00"
        );

        // token is reused
        source.fetch().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_station() {
        let server = MockServer::start().await;
        mount_token(&server, "at-1").await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(station_data(false)))
            .mount(&server)
            .await;

        let err = source(&server).fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_expired_token_code_is_auth_expired() {
        let server = MockServer::start().await;
        mount_token(&server, "at-1").await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 3, "message": "Access token expired"}
            })))
            .mount(&server)
            .await;

        let source = source(&server);
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.class(), contracts::ErrorClass::AuthExpired);
        source.refresh_credentials().await.unwrap();
    }

    #[tokio::test]
    async fn test_stations_of_one_account_refresh_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-2"
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 3, "message": "Access token expired"}
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(station_data(true)))
            .mount(&server)
            .await;

        let first = source(&server);
        let second = NetatmoSource::new("70:ee:50:00:00:01".into(), Arc::clone(&first.account));
        let err = first.fetch().await.unwrap_err();
        assert_eq!(err.class(), contracts::ErrorClass::AuthExpired);

        let (a, b) = tokio::join!(first.refresh_credentials(), second.refresh_credentials());
        a.unwrap();
        b.unwrap();
        first.fetch().await.unwrap();
        second.fetch().await.unwrap();
        // dropping the server verifies two token calls: initial and one refresh
    }

    #[tokio::test]
    async fn test_refused_refresh_is_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let err = source(&server).fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::AuthExpired { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        mount_token(&server, "at-1").await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = source(&server).fetch().await.unwrap_err();
        assert_eq!(err.class(), contracts::ErrorClass::Retryable);
    }

    #[test]
    fn test_missing_station() {
        let devices = vec![json!({"_id": "other", "reachable": true, "dashboard_data": {}})];
        let err = select_device(&STATION.into(), &devices).unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }
}
