//! Source adapter traits - upstream reading abstraction
//!
//! A sensor is read in one of two shapes, fixed at configuration time:
//! pulled on an interval (`PollingSource`) or pushed by its transport
//! (`SubscribingSource`). Both deliver the same `ReadingBatch` and report
//! credential expiry as `SourceError::AuthExpired`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{EntityName, ReadingBatch, SourceError, TransportShape};

/// Boxed fetch future, so polling sources stay object safe
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ReadingBatch, SourceError>> + Send + 'a>>;

/// Boxed credential refresh future
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SourceError>> + Send + 'a>>;

/// Reading callback type
///
/// Invoked from the transport's context whenever a message for the sensor is
/// decoded (or fails to decode). Implementations must not block.
pub type ReadingCallback = Arc<dyn Fn(Result<ReadingBatch, SourceError>) + Send + Sync>;

/// Pull-on-interval source
///
/// `fetch` must be safe to call repeatedly; each call is independent.
pub trait PollingSource: Send + Sync {
    fn sensor(&self) -> &EntityName;

    /// Fetch the latest reading batch
    fn fetch(&self) -> FetchFuture<'_>;

    /// Renew upstream credentials after `AuthExpired`
    fn refresh_credentials(&self) -> RefreshFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Push-on-event source
///
/// # Example
///
/// ```ignore
/// let source: Box<dyn SubscribingSource> = build_source();
/// source.subscribe(Arc::new(|result| {
///     if let Ok(batch) = result {
///         println!("{} fields from {}", batch.fields.len(), batch.sensor);
///     }
/// }));
/// // ...
/// source.unsubscribe();
/// ```
pub trait SubscribingSource: Send + Sync {
    fn sensor(&self) -> &EntityName;

    /// Register the callback. Repeated calls replace the previous callback.
    fn subscribe(&self, callback: ReadingCallback);

    /// Stop delivering to the callback
    fn unsubscribe(&self);

    fn is_subscribed(&self) -> bool;
}

/// Source adapter bound to one sensor
pub enum SourceAdapter {
    Polling(Box<dyn PollingSource>),
    Subscribing(Box<dyn SubscribingSource>),
}

impl SourceAdapter {
    pub fn sensor(&self) -> &EntityName {
        match self {
            Self::Polling(s) => s.sensor(),
            Self::Subscribing(s) => s.sensor(),
        }
    }

    pub fn shape(&self) -> TransportShape {
        match self {
            Self::Polling(_) => TransportShape::Polling,
            Self::Subscribing(_) => TransportShape::Subscribing,
        }
    }
}

impl std::fmt::Debug for SourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAdapter")
            .field("sensor", self.sensor())
            .field("shape", &self.shape())
            .finish()
    }
}
