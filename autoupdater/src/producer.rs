//! The producer contract
//!
//! A producer is whatever the engine calls on every poll. It receives the
//! updater's `CallArgs` and returns a boxed future of a `ProducerResult`.
//! Synchronous producers are wrapped in an already-resolved future, so the
//! engine handles both kinds identically.

use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};

use crate::error::ProducerError;
use crate::types::{CallArgs, Value};

/// Outcome of a single producer call
///
/// `Ok(None)` means the call succeeded but had nothing to publish; the
/// updater's failure counter is reset and its current value is kept.
/// `Ok(Some(Value::Null))` is treated the same way.
pub type ProducerResult = Result<Option<Value>, ProducerError>;

/// Shared handle to a producer, as stored by the engine
pub type SharedProducer = Arc<dyn Producer>;

/// Operation invoked by the engine on every poll
pub trait Producer: Send + Sync + 'static {
    /// Start one call with the given arguments
    fn produce(&self, args: CallArgs) -> BoxFuture<'static, ProducerResult>;
}

/// Producer backed by a synchronous closure
pub struct FnProducer<F> {
    f: F,
}

impl<F> Producer for FnProducer<F>
where
    F: Fn(&CallArgs) -> ProducerResult + Send + Sync + 'static,
{
    fn produce(&self, args: CallArgs) -> BoxFuture<'static, ProducerResult> {
        future::ready((self.f)(&args)).boxed()
    }
}

/// Producer backed by a closure returning a future
pub struct AsyncProducer<F> {
    f: F,
}

impl<F, Fut> Producer for AsyncProducer<F>
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProducerResult> + Send + 'static,
{
    fn produce(&self, args: CallArgs) -> BoxFuture<'static, ProducerResult> {
        (self.f)(args).boxed()
    }
}

/// Wrap a synchronous closure as a producer
///
/// ```rust
/// use autoupdater::producer;
/// use serde_json::json;
///
/// let clock = producer::from_fn(|_args| Ok(Some(json!(42))));
/// ```
pub fn from_fn<F>(f: F) -> SharedProducer
where
    F: Fn(&CallArgs) -> ProducerResult + Send + Sync + 'static,
{
    Arc::new(FnProducer { f })
}

/// Wrap an async closure as a producer
///
/// ```rust,ignore
/// let quotes = producer::from_async(|args| async move {
///     let symbol = args.first().cloned();
///     fetch_quote(symbol).await.map(Some).map_err(ProducerError::from)
/// });
/// ```
pub fn from_async<F, Fut>(f: F) -> SharedProducer
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProducerResult> + Send + 'static,
{
    Arc::new(AsyncProducer { f })
}

/// A producer that always yields the same value
pub fn constant(value: impl Into<Value>) -> SharedProducer {
    let value = value.into();
    from_fn(move |_| Ok(Some(value.clone())))
}
