//! Configuration types for the autoupdater crate
//!
//! `UpdaterConfig` is the fully resolved configuration an updater runs with.
//! `ConfigPatch` carries partial overrides: registration overlays a patch onto
//! the engine-wide defaults, and `modify_config` overlays one onto an existing
//! updater's config.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::error::ConfigError;
use crate::timer::MAX_PERIOD;
use crate::types::{CallArgs, MaxFailures, Value, WaitFor};

/// Default time between polls
pub const DEFAULT_REFRESH_TIMER: Duration = Duration::from_secs(10);

/// Longest accepted time between polls
pub const MAX_REFRESH_TIMER: Duration = MAX_PERIOD;

/// Default consecutive-failure threshold
pub const DEFAULT_MAX_FAILURES: u32 = 2;

/// Default value published in the failed state
pub const DEFAULT_FAILURE_VALUE: &str = "?";

/// Default status label published in the failed state
pub const DEFAULT_FAILURE_LABEL: &str = "Could not update.";

/// Resolved configuration for a single updater
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use autoupdater::{MaxFailures, UpdaterConfig};
///
/// let config = UpdaterConfig::new()
///     .with_refresh_timer(Duration::from_secs(30))
///     .with_max_failures(MaxFailures::Never)
///     .with_broadcast_event("prices-refreshed");
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UpdaterConfig {
    /// Time between polls; `None` disables automatic scheduling
    /// Default: 10 seconds
    pub refresh_timer: Option<Duration>,

    /// Arm the next tick only after the previous poll settles
    /// Default: true
    pub dynamic_refresh: bool,

    /// Consecutive failures before the updater gives up
    /// Default: after 2
    pub max_failures: MaxFailures,

    /// Value published on entering the failed state
    /// Default: "?"
    pub failure_value: Value,

    /// Status label published on entering the failed state
    /// Default: "Could not update."
    pub failure_label: String,

    /// Start polling as part of registration
    /// Default: true
    pub auto_start: bool,

    /// Gate delaying the first poll
    /// Default: none
    pub wait_for: Option<WaitFor>,

    /// Event published on the bus after every successful poll
    /// Default: none
    pub broadcast_event: Option<String>,

    /// Event that forces an immediate poll when published
    /// Default: none
    pub listen_event: Option<String>,

    /// Arguments handed to the producer on every call
    /// Default: empty
    pub call_args: CallArgs,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            refresh_timer: Some(DEFAULT_REFRESH_TIMER),
            dynamic_refresh: true,
            max_failures: MaxFailures::After(DEFAULT_MAX_FAILURES),
            failure_value: json!(DEFAULT_FAILURE_VALUE),
            failure_label: DEFAULT_FAILURE_LABEL.to_string(),
            auto_start: true,
            wait_for: None,
            broadcast_event: None,
            listen_event: None,
            call_args: CallArgs::new(),
        }
    }
}

impl UpdaterConfig {
    /// Create a new UpdaterConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config for fast, persistent polling
    pub fn fast_polling() -> Self {
        Self {
            refresh_timer: Some(Duration::from_secs(2)),
            max_failures: MaxFailures::Never,
            ..Default::default()
        }
    }

    /// Create a config that only polls on explicit `update` calls
    pub fn manual() -> Self {
        Self {
            refresh_timer: None,
            ..Default::default()
        }
    }

    /// Create a config using a fixed-period repeating timer
    pub fn static_refresh(period: Duration) -> Self {
        Self {
            refresh_timer: Some(period),
            dynamic_refresh: false,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(period) = self.refresh_timer {
            if period.is_zero() {
                return Err(ConfigError::ZeroRefreshTimer(period));
            }
            if period > MAX_REFRESH_TIMER {
                return Err(ConfigError::RefreshTimerTooLong(period));
            }
        }

        if matches!(self.broadcast_event.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::EmptyEventName("broadcast_event"));
        }

        if matches!(self.listen_event.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::EmptyEventName("listen_event"));
        }

        if let (Some(broadcast), Some(listen)) = (&self.broadcast_event, &self.listen_event) {
            if broadcast == listen {
                return Err(ConfigError::EventLoop(broadcast.clone()));
            }
        }

        Ok(())
    }

    /// Overlay `patch` onto this config in place
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(refresh_timer) = patch.refresh_timer {
            self.refresh_timer = refresh_timer;
        }
        if let Some(dynamic_refresh) = patch.dynamic_refresh {
            self.dynamic_refresh = dynamic_refresh;
        }
        if let Some(max_failures) = patch.max_failures {
            self.max_failures = max_failures;
        }
        if let Some(failure_value) = &patch.failure_value {
            self.failure_value = failure_value.clone();
        }
        if let Some(failure_label) = &patch.failure_label {
            self.failure_label = failure_label.clone();
        }
        if let Some(auto_start) = patch.auto_start {
            self.auto_start = auto_start;
        }
        if let Some(wait_for) = &patch.wait_for {
            self.wait_for = wait_for.clone();
        }
        if let Some(broadcast_event) = &patch.broadcast_event {
            self.broadcast_event = broadcast_event.clone();
        }
        if let Some(listen_event) = &patch.listen_event {
            self.listen_event = listen_event.clone();
        }
        if let Some(call_args) = &patch.call_args {
            self.call_args = call_args.clone();
        }
    }

    /// Return a fresh config with `patch` overlaid, leaving `self` untouched
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        let mut merged = self.clone();
        merged.apply(patch);
        merged
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_refresh_timer(mut self, period: Duration) -> Self {
        self.refresh_timer = Some(period);
        self
    }

    pub fn without_refresh_timer(mut self) -> Self {
        self.refresh_timer = None;
        self
    }

    pub fn with_dynamic_refresh(mut self, dynamic: bool) -> Self {
        self.dynamic_refresh = dynamic;
        self
    }

    pub fn with_max_failures(mut self, max_failures: MaxFailures) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_failure(mut self, value: impl Into<Value>, label: impl Into<String>) -> Self {
        self.failure_value = value.into();
        self.failure_label = label.into();
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_wait_for(mut self, gate: WaitFor) -> Self {
        self.wait_for = Some(gate);
        self
    }

    pub fn with_broadcast_event(mut self, name: impl Into<String>) -> Self {
        self.broadcast_event = Some(name.into());
        self
    }

    pub fn with_listen_event(mut self, name: impl Into<String>) -> Self {
        self.listen_event = Some(name.into());
        self
    }

    pub fn with_call_args(mut self, args: impl Into<CallArgs>) -> Self {
        self.call_args = args.into();
        self
    }
}

/// Partial configuration: every field is an optional override
///
/// Nullable fields use a nested `Option` so a patch can tell "leave alone"
/// (`None`) apart from "clear" (`Some(None)`).
///
/// Patches can be read from JSON. Durations are given in milliseconds under
/// `refresh_timer_ms`, and `max_failures` accepts `-1` for "never fail":
///
/// ```rust
/// use autoupdater::{ConfigPatch, MaxFailures};
///
/// let patch = ConfigPatch::from_json(r#"{ "refresh_timer_ms": 5000, "max_failures": -1 }"#).unwrap();
/// assert_eq!(patch.max_failures, Some(MaxFailures::Never));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigPatch {
    #[serde(rename = "refresh_timer_ms", deserialize_with = "millis_override")]
    pub refresh_timer: Option<Option<Duration>>,

    pub dynamic_refresh: Option<bool>,

    pub max_failures: Option<MaxFailures>,

    #[serde(deserialize_with = "present")]
    pub failure_value: Option<Value>,

    pub failure_label: Option<String>,

    pub auto_start: Option<bool>,

    #[serde(skip)]
    pub wait_for: Option<Option<WaitFor>>,

    #[serde(deserialize_with = "present")]
    pub broadcast_event: Option<Option<String>>,

    #[serde(deserialize_with = "present")]
    pub listen_event: Option<Option<String>>,

    pub call_args: Option<CallArgs>,
}

impl ConfigPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a patch from JSON
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether the patch overrides nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_refresh_timer(mut self, period: Duration) -> Self {
        self.refresh_timer = Some(Some(period));
        self
    }

    pub fn without_refresh_timer(mut self) -> Self {
        self.refresh_timer = Some(None);
        self
    }

    pub fn with_dynamic_refresh(mut self, dynamic: bool) -> Self {
        self.dynamic_refresh = Some(dynamic);
        self
    }

    pub fn with_max_failures(mut self, max_failures: MaxFailures) -> Self {
        self.max_failures = Some(max_failures);
        self
    }

    pub fn with_failure_value(mut self, value: impl Into<Value>) -> Self {
        self.failure_value = Some(value.into());
        self
    }

    pub fn with_failure_label(mut self, label: impl Into<String>) -> Self {
        self.failure_label = Some(label.into());
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = Some(auto_start);
        self
    }

    pub fn with_wait_for(mut self, gate: WaitFor) -> Self {
        self.wait_for = Some(Some(gate));
        self
    }

    pub fn with_broadcast_event(mut self, name: impl Into<String>) -> Self {
        self.broadcast_event = Some(Some(name.into()));
        self
    }

    pub fn without_broadcast_event(mut self) -> Self {
        self.broadcast_event = Some(None);
        self
    }

    pub fn with_listen_event(mut self, name: impl Into<String>) -> Self {
        self.listen_event = Some(Some(name.into()));
        self
    }

    pub fn without_listen_event(mut self) -> Self {
        self.listen_event = Some(None);
        self
    }

    pub fn with_call_args(mut self, args: impl Into<CallArgs>) -> Self {
        self.call_args = Some(args.into());
        self
    }
}

/// A field that is present in the input is always an override, even if null
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn millis_override<'de, D>(deserializer: D) -> Result<Option<Option<Duration>>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis: Option<u64> = Option::deserialize(deserializer)?;
    Ok(Some(millis.map(Duration::from_millis)))
}
