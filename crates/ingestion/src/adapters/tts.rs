//! The Things Stack subscribing adapter
//!
//! All sensors of one TTS application share a single MQTT connection
//! (`TtsApplication`). Uplinks arrive on `v3/{application}/devices/+/up` and
//! are routed to the per-sensor callback by `end_device_ids.dev_eui`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    EntityName, ReadingBatch, ReadingCallback, SourceError, SubscribingSource, TtsSettings,
};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::credentials::TtsCredentials;

/// Uplink topic filter of an application
pub fn uplink_topic(application: &str) -> String {
    format!("v3/{application}/devices/+/up")
}

/// Device EUI an uplink is addressed to
pub fn device_eui(message: &Value) -> Option<&str> {
    message
        .pointer("/end_device_ids/dev_eui")
        .and_then(Value::as_str)
}

/// Decode one uplink message for `sensor`
pub fn decode_uplink(sensor: &EntityName, message: &Value) -> Result<ReadingBatch, SourceError> {
    let fields = message
        .pointer("/uplink_message/decoded_payload")
        .and_then(Value::as_object)
        .ok_or_else(|| SourceError::decode(sensor.as_str(), "uplink has no decoded_payload"))?;
    let received_at = message
        .pointer("/uplink_message/rx_metadata/0/received_at")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SourceError::decode(sensor.as_str(), "uplink has no rx_metadata received_at")
        })?;
    let time = DateTime::parse_from_rfc3339(received_at)
        .map_err(|e| {
            SourceError::decode(sensor.as_str(), format!("received_at '{received_at}': {e}"))
        })?
        .with_timezone(&Utc);

    let mut batch = ReadingBatch::new(sensor.clone()).at(time);
    batch.fields = fields
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(batch)
}

struct Registration {
    sensor: EntityName,
    callback: ReadingCallback,
}

/// Shared MQTT connection of one TTS application
pub struct TtsApplication {
    application: String,
    options: MqttOptions,
    reconnect_delay: Duration,
    /// Keyed by lower-cased dev EUI
    callbacks: Arc<Mutex<HashMap<String, Registration>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl TtsApplication {
    pub fn new(
        application: impl Into<String>,
        host: &str,
        settings: &TtsSettings,
        credentials: &TtsCredentials,
    ) -> Self {
        let application = application.into();
        let client_id = format!("sta-ingest-{}-{}", application, std::process::id());
        let mut options = MqttOptions::new(client_id, host, settings.port);
        options.set_credentials(application.clone(), credentials.api_key.expose_secret());
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        if settings.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        Self {
            application,
            options,
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            event_loop: Mutex::new(None),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        lock(&self.callbacks)
    }

    /// Route uplinks for `sensor` to `callback`, replacing any previous one
    pub fn register(&self, sensor: &EntityName, callback: ReadingCallback) {
        self.registrations().insert(
            sensor.to_ascii_lowercase(),
            Registration {
                sensor: sensor.clone(),
                callback,
            },
        );
    }

    /// Remove a sensor; the connection closes with its last sensor
    pub fn deregister(&self, sensor: &EntityName) {
        let now_empty = {
            let mut registrations = self.registrations();
            registrations.remove(&sensor.to_ascii_lowercase());
            registrations.is_empty()
        };
        if now_empty {
            if let Some(handle) = lock(&self.event_loop).take() {
                handle.abort();
                info!(application = %self.application, "last sensor left, MQTT connection closed");
            }
        }
    }

    pub fn is_registered(&self, sensor: &EntityName) -> bool {
        self.registrations()
            .contains_key(&sensor.to_ascii_lowercase())
    }

    pub fn sensor_count(&self) -> usize {
        self.registrations().len()
    }

    /// Start the shared event loop unless it is already running
    pub fn ensure_started(&self) {
        let mut slot = lock(&self.event_loop);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(
                    application = %self.application,
                    error = %e,
                    "cannot start MQTT event loop outside a runtime"
                );
                broadcast(&self.callbacks, |sensor| {
                    SourceError::transport(sensor, "MQTT event loop not started")
                });
                return;
            }
        };

        let (client, event_loop) = AsyncClient::new(self.options.clone(), 32);
        let connection = Connection {
            application: self.application.clone(),
            topic: uplink_topic(&self.application),
            client,
            callbacks: Arc::clone(&self.callbacks),
            reconnect_delay: self.reconnect_delay,
        };
        *slot = Some(runtime.spawn(connection.run(event_loop)));
        info!(
            application = %self.application,
            broker = %self.options.broker_address().0,
            "MQTT event loop started"
        );
    }

    /// Decode a raw publish and hand it to the owning sensor's callback
    pub fn dispatch(&self, payload: &[u8]) {
        dispatch(&self.application, &self.callbacks, payload);
    }

    /// Deliver one error to every registered sensor
    pub fn broadcast_error(&self, make: impl Fn(&str) -> SourceError) {
        broadcast(&self.callbacks, make);
    }
}

impl Drop for TtsApplication {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.event_loop).take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TtsApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsApplication")
            .field("application", &self.application)
            .field("broker", &self.options.broker_address())
            .field("sensors", &self.sensor_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch(application: &str, callbacks: &Mutex<HashMap<String, Registration>>, payload: &[u8]) {
    let message: Value = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(application = %application, error = %e, "dropping non-JSON uplink");
            return;
        }
    };
    let Some(eui) = device_eui(&message) else {
        warn!(application = %application, "dropping uplink without end_device_ids.dev_eui");
        return;
    };

    let target = lock(callbacks)
        .get(&eui.to_ascii_lowercase())
        .map(|r| (r.sensor.clone(), Arc::clone(&r.callback)));
    match target {
        Some((sensor, callback)) => callback(decode_uplink(&sensor, &message)),
        None => debug!(
            application = %application,
            dev_eui = %eui,
            "uplink for unconfigured device"
        ),
    }
}

fn broadcast(
    callbacks: &Mutex<HashMap<String, Registration>>,
    make: impl Fn(&str) -> SourceError,
) {
    let targets: Vec<_> = lock(callbacks)
        .values()
        .map(|r| (r.sensor.clone(), Arc::clone(&r.callback)))
        .collect();
    for (sensor, callback) in targets {
        callback(Err(make(&sensor)));
    }
}

fn is_auth_refusal(err: &ConnectionError) -> bool {
    matches!(
        err,
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
        )
    )
}

/// Event loop task state
struct Connection {
    application: String,
    topic: String,
    client: AsyncClient,
    callbacks: Arc<Mutex<HashMap<String, Registration>>>,
    reconnect_delay: Duration,
}

impl Connection {
    async fn run(self, mut event_loop: EventLoop) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // clean sessions drop subscriptions on every reconnect
                    if let Err(e) = self.client.try_subscribe(&self.topic, QoS::AtLeastOnce) {
                        warn!(
                            application = %self.application,
                            error = %e,
                            "subscribe request failed"
                        );
                    } else {
                        info!(
                            application = %self.application,
                            topic = %self.topic,
                            "connected, subscribing"
                        );
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    dispatch(&self.application, &self.callbacks, &publish.payload);
                }
                Ok(_) => {}
                Err(e) if is_auth_refusal(&e) => {
                    error!(
                        application = %self.application,
                        error = %e,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "broker refused credentials"
                    );
                    let message = e.to_string();
                    broadcast(&self.callbacks, |sensor| {
                        SourceError::auth_expired(sensor, message.clone())
                    });
                    tokio::time::sleep(self.reconnect_delay).await;
                }
                Err(e) => {
                    warn!(
                        application = %self.application,
                        error = %e,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "MQTT connection error, reconnecting"
                    );
                    let message = e.to_string();
                    broadcast(&self.callbacks, |sensor| {
                        SourceError::transport(sensor, message.clone())
                    });
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}

/// Subscribing source for one LoRaWAN device
#[derive(Debug)]
pub struct TtsSource {
    sensor: EntityName,
    application: Arc<TtsApplication>,
}

impl TtsSource {
    pub fn new(sensor: EntityName, application: Arc<TtsApplication>) -> Self {
        Self {
            sensor,
            application,
        }
    }
}

impl SubscribingSource for TtsSource {
    fn sensor(&self) -> &EntityName {
        &self.sensor
    }

    fn subscribe(&self, callback: ReadingCallback) {
        self.application.register(&self.sensor, callback);
        self.application.ensure_started();
    }

    fn unsubscribe(&self) {
        self.application.deregister(&self.sensor);
    }

    fn is_subscribed(&self) -> bool {
        self.application.is_registered(&self.sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;

    const EUI: &str = "24E124707C481005";

    fn uplink(eui: &str) -> Value {
        json!({
            "end_device_ids": {"device_id": "am308-lab", "dev_eui": eui},
            "uplink_message": {
                "decoded_payload": {"temperature": 22.5, "co2": 640, "pir": "trigger"},
                "rx_metadata": [{"received_at": "2025-03-01T12:00:00.123Z"}]
            }
        })
    }

    fn application() -> TtsApplication {
        let settings = TtsSettings {
            tls: false,
            ..TtsSettings::default()
        };
        let credentials = TtsCredentials {
            api_key: SecretString::from("NNSXS.test".to_string()),
        };
        TtsApplication::new("lab-lorawan", "eu1.cloud.thethings.network", &settings, &credentials)
    }

    fn collector() -> (ReadingCallback, Arc<Mutex<Vec<Result<ReadingBatch, SourceError>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ReadingCallback = Arc::new(move |result| sink.lock().unwrap().push(result));
        (callback, seen)
    }

    #[test]
    fn test_decode_uplink() {
        let batch = decode_uplink(&EUI.into(), &uplink(EUI)).unwrap();
        assert_eq!(batch.fields.len(), 3);
        assert_eq!(batch.fields["pir"], json!("trigger"));
        assert_eq!(
            batch.phenomenon_time.unwrap().to_rfc3339(),
            "2025-03-01T12:00:00.123+00:00"
        );
    }

    #[test]
    fn test_decode_missing_payload() {
        let message = json!({"end_device_ids": {"dev_eui": EUI}, "uplink_message": {}});
        let err = decode_uplink(&EUI.into(), &message).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[test]
    fn test_dispatch_by_dev_eui() {
        let app = application();
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();
        app.register(&EUI.into(), first);
        app.register(&"24E124707C481006".into(), second);

        // dev EUIs are matched regardless of case
        app.dispatch(uplink(&EUI.to_lowercase()).to_string().as_bytes());
        app.dispatch(b"not json");

        let first_seen = first_seen.lock().unwrap();
        assert_eq!(first_seen.len(), 1);
        assert_eq!(first_seen[0].as_ref().unwrap().sensor, EUI);
        assert!(second_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_auth_refusal_reaches_every_sensor() {
        let app = application();
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();
        app.register(&EUI.into(), first);
        app.register(&"24E124707C481006".into(), second);

        app.broadcast_error(|sensor| SourceError::auth_expired(sensor, "not authorized"));

        for seen in [first_seen, second_seen] {
            let seen = seen.lock().unwrap();
            assert!(matches!(seen[0], Err(SourceError::AuthExpired { .. })));
        }
        assert!(is_auth_refusal(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized
        )));
    }

    #[test]
    fn test_source_registration() {
        let app = Arc::new(application());
        let source = TtsSource::new(EUI.into(), Arc::clone(&app));
        let (callback, _) = collector();

        app.register(source.sensor(), callback);
        assert!(source.is_subscribed());
        source.unsubscribe();
        assert!(!source.is_subscribed());
        assert_eq!(app.sensor_count(), 0);
    }
}
