//! Core value types shared across the engine
//!
//! Identifiers, the producer parameter bundle, the failure threshold and the
//! start gate.

use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RegistryError};

/// Values produced by updaters and published to consumers
pub type Value = serde_json::Value;

/// Unique key an updater is known by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdaterId(String);

impl UpdaterId {
    /// Prefix used for generated identifiers
    pub const GENERATED_PREFIX: &'static str = "updater-";

    /// Validate and wrap a caller-supplied identifier
    ///
    /// Empty (or whitespace-only) identifiers are rejected.
    pub fn parse(raw: impl Into<String>) -> Result<Self, RegistryError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(RegistryError::InvalidId(raw));
        }
        Ok(Self(raw))
    }

    /// Generate a probabilistically unique identifier
    pub fn generate() -> Self {
        Self(format!("{}{}", Self::GENERATED_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpdaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl Borrow<str> for UpdaterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for UpdaterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for UpdaterId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for UpdaterId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Ordered parameter bundle handed to the producer on every call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallArgs(Vec<Value>);

impl CallArgs {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument, builder style
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.0.push(value.into());
        self
    }

    /// Consume the bundle, returning the underlying values
    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl Deref for CallArgs {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for CallArgs {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Consecutive-failure threshold
///
/// Serialised as an integer, with `-1` reserved for [`MaxFailures::Never`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum MaxFailures {
    /// Keep polling regardless of how many calls fail
    Never,
    /// Enter the failed state once this many consecutive polls have failed
    After(u32),
}

impl MaxFailures {
    /// Raw sentinel meaning "never fail"
    pub const NEVER_SENTINEL: i64 = -1;

    /// Whether `consecutive_failures` has reached the threshold
    pub fn is_reached(&self, consecutive_failures: u32) -> bool {
        match self {
            Self::Never => false,
            Self::After(limit) => consecutive_failures >= *limit,
        }
    }

    /// Raw integer form
    pub fn as_raw(&self) -> i64 {
        match self {
            Self::Never => Self::NEVER_SENTINEL,
            Self::After(limit) => i64::from(*limit),
        }
    }
}

impl TryFrom<i64> for MaxFailures {
    type Error = ConfigError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        if raw == Self::NEVER_SENTINEL {
            return Ok(Self::Never);
        }
        u32::try_from(raw)
            .map(Self::After)
            .map_err(|_| ConfigError::InvalidMaxFailures(raw))
    }
}

impl From<MaxFailures> for i64 {
    fn from(max: MaxFailures) -> Self {
        max.as_raw()
    }
}

impl fmt::Display for MaxFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("never"),
            Self::After(limit) => write!(f, "after {}", limit),
        }
    }
}

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

/// Gate that delays an updater's first poll until it resolves
///
/// Clones share the same underlying future, so one gate can hold back any
/// number of updaters.
///
/// # Example
///
/// ```rust,ignore
/// let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
/// let gate = WaitFor::new(async move {
///     let _ = ready_rx.await;
/// });
///
/// engine.register(producer, None, Some(ConfigPatch::new().with_wait_for(gate)))?;
/// // ... later
/// let _ = ready_tx.send(());
/// ```
#[derive(Clone)]
pub struct WaitFor {
    id: u64,
    gate: Shared<BoxFuture<'static, ()>>,
}

impl WaitFor {
    /// Wrap any future as a start gate
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            gate: future.boxed().shared(),
        }
    }

    /// A gate that is already open
    pub fn ready() -> Self {
        Self::new(futures::future::ready(()))
    }

    /// Whether the gate has already resolved
    pub fn is_open(&self) -> bool {
        self.gate.peek().is_some()
    }

    pub(crate) async fn wait(&self) {
        self.gate.clone().await
    }
}

impl PartialEq for WaitFor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitFor")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
