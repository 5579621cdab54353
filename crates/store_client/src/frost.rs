//! FROST-Server HTTP transport
//!
//! SensorThings REST surface:
//! - lookup: `GET {endpoint}/{Collection}?$filter=name eq '<name>'`
//! - create: `POST {endpoint}/{Collection}` with basic auth; the new id is read
//!   from the `Location` header, falling back to `@iot.id` in the body

use std::time::Duration;

use contracts::{name_filter, EntityKind, RemoteId};
use reqwest::header::LOCATION;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, StoreError};
use crate::store::RemoteStore;

const OBSERVATIONS: &str = "/Observations";

/// FROST-Server client
pub struct FrostStore {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    password: Option<SecretString>,
}

impl FrostStore {
    /// Build a client for `endpoint` (e.g. `http://localhost:8080/FROST-Server/v1.1`)
    ///
    /// `request_timeout` bounds every request at the transport level.
    pub fn new(
        endpoint: &str,
        user: impl Into<String>,
        password: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Config(format!("cannot build HTTP client: {e}")))?;
        Self::with_client(http, endpoint, user, password)
    }

    /// Wrap an existing `reqwest::Client`
    pub fn with_client(
        http: reqwest::Client,
        endpoint: &str,
        user: impl Into<String>,
        password: Option<SecretString>,
    ) -> Result<Self> {
        let parsed = Url::parse(endpoint)
            .map_err(|e| StoreError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StoreError::Config(format!(
                "endpoint '{endpoint}' is not http(s)"
            )));
        }
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            user: user.into(),
            password,
        })
    }

    fn collection_url(&self, collection: &str) -> Result<Url> {
        let raw = format!("{}{collection}", self.endpoint);
        Url::parse(&raw).map_err(|e| StoreError::Config(format!("invalid URL '{raw}': {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.password {
            Some(password) => request.basic_auth(&self.user, Some(password.expose_secret())),
            None => request,
        }
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(operation, status, body))
    }

    async fn post(&self, operation: &str, collection: &str, body: &Value) -> Result<RemoteId> {
        let url = self.collection_url(collection)?;
        debug!(%url, "POST");
        let response = self.send(operation, self.http.post(url).json(body)).await?;

        if let Some(id) = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(id_from_location)
        {
            return Ok(id);
        }

        let text = response
            .text()
            .await
            .map_err(|e| StoreError::unavailable(operation, e.to_string()))?;
        serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("@iot.id").and_then(RemoteId::from_json))
            .ok_or_else(|| {
                StoreError::rejected(
                    operation,
                    None,
                    "response carried neither a Location header nor an @iot.id",
                )
            })
    }
}

impl RemoteStore for FrostStore {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(name = "frost_find_by_name", skip(self), fields(kind = %kind, name = %name))]
    async fn find_by_name(&self, kind: EntityKind, name: &str) -> Result<Option<RemoteId>> {
        let operation = format!("find {kind}");
        let mut url = self.collection_url(kind.collection())?;
        url.query_pairs_mut()
            .append_pair("$filter", &name_filter(name))
            .append_pair("$select", "id");
        debug!(%url, "GET");

        let response = self.send(&operation, self.http.get(url)).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| StoreError::rejected(&operation, None, format!("invalid JSON: {e}")))?;

        Ok(body
            .get("value")
            .and_then(Value::as_array)
            .and_then(|matches| matches.first())
            .and_then(|entity| entity.get("@iot.id"))
            .and_then(RemoteId::from_json))
    }

    #[instrument(name = "frost_create", skip(self, body), fields(kind = %kind))]
    async fn create(&self, kind: EntityKind, body: &Value) -> Result<RemoteId> {
        self.post(&format!("create {kind}"), kind.collection(), body)
            .await
    }

    #[instrument(
        name = "frost_create_observation",
        skip(self, body),
        fields(datastream = %datastream)
    )]
    async fn create_observation(&self, datastream: &RemoteId, body: &Value) -> Result<RemoteId> {
        let mut payload = body.clone();
        if let Some(map) = payload.as_object_mut() {
            map.insert("Datastream".into(), datastream.as_reference());
        }
        self.post("create Observation", OBSERVATIONS, &payload)
            .await
    }

    #[instrument(name = "frost_check_connection", skip(self), fields(endpoint = %self.endpoint))]
    async fn check_connection(&self) -> Result<()> {
        let mut url = self.collection_url(EntityKind::Datastream.collection())?;
        url.query_pairs_mut().append_pair("$top", "1");
        self.send("connection check", self.http.get(url)).await?;
        Ok(())
    }
}

/// Extract the key of `.../Things(42)` or `.../Things('abc')`
fn id_from_location(location: &str) -> Option<RemoteId> {
    let start = location.rfind('(')?;
    let key = location[start + 1..].strip_suffix(')')?;
    RemoteId::parse_key(key)
}

fn transport_error(operation: &str, err: &reqwest::Error) -> StoreError {
    if err.is_builder() {
        return StoreError::rejected(operation, None, err.to_string());
    }
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    StoreError::unavailable(operation, message)
}

fn status_error(operation: &str, status: StatusCode, body: String) -> StoreError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StoreError::unavailable(operation, format!("{status}: {body}"))
    } else {
        StoreError::rejected(operation, Some(status.as_u16()), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, FrostStore) {
        let server = MockServer::start().await;
        let store = FrostStore::new(
            &format!("{}/FROST-Server/v1.1", server.uri()),
            "sta-manager",
            Some(SecretString::from("secret".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        (server, store)
    }

    #[test]
    fn test_id_from_location() {
        assert_eq!(
            id_from_location("http://h/FROST-Server/v1.1/Things(42)"),
            Some(RemoteId::Number(42))
        );
        assert_eq!(
            id_from_location("http://h/v1.1/Sensors('70:ee:50')"),
            Some(RemoteId::Text("70:ee:50".into()))
        );
        assert_eq!(id_from_location("http://h/v1.1/Things"), None);
    }

    #[tokio::test]
    async fn test_find_by_name_hit_and_miss() {
        let (server, store) = setup().await;

        Mock::given(method("GET"))
            .and(path("/FROST-Server/v1.1/Locations"))
            .and(query_param("$filter", "name eq 'Room120'"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": [{"@iot.id": 7}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/FROST-Server/v1.1/Locations"))
            .and(query_param("$filter", "name eq 'Room121'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;

        let hit = store
            .find_by_name(EntityKind::Location, "Room120")
            .await
            .unwrap();
        assert_eq!(hit, Some(RemoteId::Number(7)));

        let miss = store
            .find_by_name(EntityKind::Location, "Room121")
            .await
            .unwrap();
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_create_reads_location_header() {
        let (server, store) = setup().await;

        Mock::given(method("POST"))
            .and(path("/FROST-Server/v1.1/Things"))
            .and(basic_auth("sta-manager", "secret"))
            .and(body_partial_json(json!({"name": "Desk"})))
            .respond_with(ResponseTemplate::new(201).insert_header(
                "Location",
                format!("{}/FROST-Server/v1.1/Things(12)", server.uri()).as_str(),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let id = store
            .create(EntityKind::Thing, &json!({"name": "Desk", "description": "d"}))
            .await
            .unwrap();
        assert_eq!(id, RemoteId::Number(12));
    }

    #[tokio::test]
    async fn test_create_falls_back_to_body_id() {
        let (server, store) = setup().await;

        Mock::given(method("POST"))
            .and(path("/FROST-Server/v1.1/Sensors"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"@iot.id": "abc"})))
            .mount(&server)
            .await;

        let id = store
            .create(EntityKind::Sensor, &json!({"name": "s1"}))
            .await
            .unwrap();
        assert_eq!(id, RemoteId::Text("abc".into()));
    }

    #[tokio::test]
    async fn test_observation_embeds_datastream() {
        let (server, store) = setup().await;

        Mock::given(method("POST"))
            .and(path("/FROST-Server/v1.1/Observations"))
            .and(body_partial_json(
                json!({"result": 21.4, "Datastream": {"@iot.id": 3}}),
            ))
            .respond_with(ResponseTemplate::new(201).insert_header(
                "Location",
                "http://h/FROST-Server/v1.1/Observations(900)",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let id = store
            .create_observation(
                &RemoteId::Number(3),
                &json!({"phenomenonTime": "2025-03-01T12:00:00Z", "result": 21.4}),
            )
            .await
            .unwrap();
        assert_eq!(id, RemoteId::Number(900));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (server, store) = setup().await;

        Mock::given(method("POST"))
            .and(path("/FROST-Server/v1.1/Things"))
            .respond_with(ResponseTemplate::new(400).set_body_string("missing description"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/FROST-Server/v1.1/Sensors"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/FROST-Server/v1.1/Locations"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = store
            .create(EntityKind::Thing, &json!({}))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::RemoteRejected { status: Some(400), ref message, .. } if message == "missing description"),
            "{err}"
        );

        let err = store
            .create(EntityKind::Sensor, &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");

        let err = store
            .create(EntityKind::Location, &json!({}))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::RemoteRejected { status: Some(401), .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        let store = FrostStore::new(
            "http://127.0.0.1:9/FROST-Server/v1.1",
            "sta-manager",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = store.check_connection().await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let result = FrostStore::new("ftp://frost", "u", None, Duration::from_secs(1));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
