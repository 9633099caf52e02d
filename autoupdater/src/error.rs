//! Error types for the autoupdater crate.

use std::time::Duration;

use crate::types::{UpdaterId, Value};

/// Errors returned by registry operations that can fail outright.
///
/// Operations keyed by an identifier that simply does not exist report that
/// through `false` / `None` instead.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The supplied identifier is empty
    #[error("Invalid updater identifier: {0:?}")]
    InvalidId(String),

    /// `register_unique` was called with an identifier already in use
    #[error("Updater already registered: {0}")]
    AlreadyRegistered(UpdaterId),

    /// The engine was created outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The resolved configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Errors from validating or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A refresh timer of zero would spin
    #[error("Refresh timer must be greater than zero, got {0:?}")]
    ZeroRefreshTimer(Duration),

    /// Refresh timer beyond what a timer can be armed for
    #[error("Refresh timer must be at most one year, got {0:?}")]
    RefreshTimerTooLong(Duration),

    /// Raw failure threshold outside of the accepted range
    #[error("Invalid max failures value: {0} (use -1 to never fail)")]
    InvalidMaxFailures(i64),

    /// Event names must not be empty
    #[error("Event name for {0} must not be empty")]
    EmptyEventName(&'static str),

    /// Broadcasting and listening on the same event would re-trigger forever
    #[error("Updater would broadcast and listen on the same event: {0}")]
    EventLoop(String),

    /// A serialized config patch could not be parsed
    #[error("Failed to parse config patch: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors reported by producers.
///
/// None of these ever reach the caller of `register` or `update`: the engine
/// counts them, records them on the updater and logs them.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The call itself failed
    #[error("Producer failed: {0}")]
    Failed(String),

    /// The call succeeded but returned something unusable
    #[error("Bad value {raw}: {reason}")]
    BadValue {
        /// The offending value, rendered as JSON
        raw: String,
        /// Why it was rejected
        reason: String,
    },

    /// Any other error raised by producer code
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProducerError {
    /// Convenience constructor for `Failed`
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Convenience constructor for `BadValue`
    pub fn bad_value(raw: &Value, reason: impl Into<String>) -> Self {
        Self::BadValue {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this is a malformed-result condition rather than a failed call
    pub fn is_bad_value(&self) -> bool {
        matches!(self, Self::BadValue { .. })
    }
}

/// Convenience type alias for registry results.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
