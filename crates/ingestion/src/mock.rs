//! Mock sensor sources
//!
//! Scripted stand-ins for the vendor adapters, used by scheduler and
//! end-to-end tests that have no upstream to talk to.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{
    EntityName, FetchFuture, PollingSource, ReadingBatch, ReadingCallback, RefreshFuture,
    SourceError, SubscribingSource,
};
use tracing::{debug, trace};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted fetch outcome
#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    Reply(Result<ReadingBatch, SourceError>),
    /// Sleep, then reply; used to exceed the fetch timeout
    Delayed(Duration, Result<ReadingBatch, SourceError>),
}

impl From<Result<ReadingBatch, SourceError>> for ScriptedFetch {
    fn from(result: Result<ReadingBatch, SourceError>) -> Self {
        Self::Reply(result)
    }
}

#[derive(Debug, Default)]
struct PollingScript {
    queue: VecDeque<ScriptedFetch>,
    last: Option<ScriptedFetch>,
    refresh_results: VecDeque<Result<(), SourceError>>,
}

/// Polling source replaying a scripted queue of fetch results
///
/// Once the queue is empty the last outcome repeats; with nothing scripted at
/// all a fetch yields an empty batch.
#[derive(Debug, Clone)]
pub struct MockPollingSource {
    sensor: EntityName,
    script: Arc<Mutex<PollingScript>>,
    fetches: Arc<AtomicU64>,
    refreshes: Arc<AtomicU64>,
}

impl MockPollingSource {
    pub fn new(sensor: impl Into<EntityName>) -> Self {
        Self {
            sensor: sensor.into(),
            script: Arc::new(Mutex::new(PollingScript::default())),
            fetches: Arc::new(AtomicU64::new(0)),
            refreshes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append outcomes to the script
    pub fn script<I>(&self, outcomes: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<ScriptedFetch>,
    {
        lock(&self.script)
            .queue
            .extend(outcomes.into_iter().map(Into::into));
        self
    }

    pub fn push_batch(&self, batch: ReadingBatch) -> &Self {
        self.script([ScriptedFetch::Reply(Ok(batch))])
    }

    pub fn push_error(&self, error: SourceError) -> &Self {
        self.script([ScriptedFetch::Reply(Err(error))])
    }

    /// Outcomes of successive `refresh_credentials` calls; default is success
    pub fn script_refresh<I>(&self, results: I) -> &Self
    where
        I: IntoIterator<Item = Result<(), SourceError>>,
    {
        lock(&self.script).refresh_results.extend(results);
        self
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn next(&self) -> ScriptedFetch {
        let mut script = lock(&self.script);
        match script.queue.pop_front() {
            Some(outcome) => {
                script.last = Some(outcome.clone());
                outcome
            }
            None => script.last.clone().unwrap_or_else(|| {
                ScriptedFetch::Reply(Ok(ReadingBatch::new(self.sensor.clone())))
            }),
        }
    }
}

impl PollingSource for MockPollingSource {
    fn sensor(&self) -> &EntityName {
        &self.sensor
    }

    fn fetch(&self) -> FetchFuture<'_> {
        let n = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
        let outcome = self.next();
        trace!(sensor = %self.sensor, fetch = n, "mock fetch");
        Box::pin(async move {
            match outcome {
                ScriptedFetch::Reply(result) => result,
                ScriptedFetch::Delayed(delay, result) => {
                    tokio::time::sleep(delay).await;
                    result
                }
            }
        })
    }

    fn refresh_credentials(&self) -> RefreshFuture<'_> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let result = lock(&self.script)
            .refresh_results
            .pop_front()
            .unwrap_or(Ok(()));
        debug!(sensor = %self.sensor, ok = result.is_ok(), "mock credential refresh");
        Box::pin(async move { result })
    }
}

/// Subscribing source driven by hand through `emit`
#[derive(Clone, Default)]
pub struct MockSubscribingSource {
    sensor: EntityName,
    callback: Arc<Mutex<Option<ReadingCallback>>>,
    subscriptions: Arc<AtomicU64>,
}

impl MockSubscribingSource {
    pub fn new(sensor: impl Into<EntityName>) -> Self {
        Self {
            sensor: sensor.into(),
            ..Self::default()
        }
    }

    /// Push handle; clones share the registered callback
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// Fire the registered callback; returns false when nobody is subscribed
    pub fn emit(&self, result: Result<ReadingBatch, SourceError>) -> bool {
        let callback = lock(&self.callback).clone();
        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    pub fn emit_batch(&self, batch: ReadingBatch) -> bool {
        self.emit(Ok(batch))
    }

    /// How many times `subscribe` was called
    pub fn subscription_count(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }
}

impl SubscribingSource for MockSubscribingSource {
    fn sensor(&self) -> &EntityName {
        &self.sensor
    }

    fn subscribe(&self, callback: ReadingCallback) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
        *lock(&self.callback) = Some(callback);
    }

    fn unsubscribe(&self) {
        lock(&self.callback).take();
    }

    fn is_subscribed(&self) -> bool {
        lock(&self.callback).is_some()
    }
}

impl std::fmt::Debug for MockSubscribingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSubscribingSource")
            .field("sensor", &self.sensor)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_polling_script_then_repeat_last() {
        let source = MockPollingSource::new("s1");
        source
            .push_error(SourceError::transport("s1", "reset"))
            .push_batch(ReadingBatch::new("s1").with_field("co2", 410));

        assert!(source.fetch().await.is_err());
        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.fields["co2"], json!(410));
        // queue exhausted: the last outcome repeats
        assert_eq!(source.fetch().await.unwrap(), batch);
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_fetch() {
        let source = MockPollingSource::new("s1");
        source.script([ScriptedFetch::Delayed(
            Duration::from_secs(60),
            Ok(ReadingBatch::new("s1")),
        )]);

        let result = tokio::time::timeout(Duration::from_secs(30), source.fetch()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scripted_refresh() {
        let source = MockPollingSource::new("s1");
        source.script_refresh([Err(SourceError::auth_expired("s1", "revoked"))]);

        assert!(source.refresh_credentials().await.is_err());
        assert!(source.refresh_credentials().await.is_ok());
        assert_eq!(source.refresh_count(), 2);
    }

    #[test]
    fn test_subscribing_emit() {
        let source = MockSubscribingSource::new("am308");
        let handle = source.handle();
        assert!(!handle.emit_batch(ReadingBatch::new("am308")));

        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        source.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        assert!(handle.emit_batch(ReadingBatch::new("am308")));
        assert!(handle.emit(Err(SourceError::decode("am308", "bad payload"))));
        assert_eq!(seen.load(Ordering::Relaxed), 2);

        source.unsubscribe();
        assert!(!handle.is_subscribed());
        assert_eq!(source.subscription_count(), 1);
    }
}
