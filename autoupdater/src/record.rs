//! Read-only snapshots of registered updaters

use std::fmt;

use crate::config::UpdaterConfig;
use crate::types::{UpdaterId, Value};

/// Status label every updater starts with until its first value lands
pub const LOADING_LABEL: &str = "Loading";

/// Coarse lifecycle state of an updater
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdaterState {
    /// Registered but not polling
    Idle,
    /// Polling on its schedule
    Running,
    /// Gave up after too many consecutive failures
    Failed,
}

impl UpdaterState {
    /// A failed updater reads as failed even though it is no longer running
    pub fn from_flags(running: bool, failed: bool) -> Self {
        if failed {
            Self::Failed
        } else if running {
            Self::Running
        } else {
            Self::Idle
        }
    }
}

impl fmt::Display for UpdaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one updater, taken under the registry lock
///
/// Snapshots never change after they are taken; read a fresh one with
/// `AutoUpdater::get_record` to observe later polls.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdaterRecord {
    /// Key the updater is registered under
    pub id: UpdaterId,

    /// Resolved configuration
    pub config: UpdaterConfig,

    /// Failed polls since the last success
    pub consecutive_failures: u32,

    /// Most recently applied value, `None` until the first one lands
    pub last_value: Option<Value>,

    /// Status text for display; empty once a value has been applied
    pub status_label: String,

    /// Whether the updater is polling
    pub running: bool,

    /// Whether the updater is in the failed state
    pub failed: bool,

    /// Whether a timer is currently armed
    pub timer_armed: bool,

    /// Number of completed polls, successful or not
    pub poll_count: u64,

    /// Description of the most recent failed poll
    pub last_error: Option<String>,
}

impl UpdaterRecord {
    /// Lifecycle state derived from the running and failed flags
    pub fn state(&self) -> UpdaterState {
        UpdaterState::from_flags(self.running, self.failed)
    }

    /// Whether no value has been applied yet
    pub fn is_loading(&self) -> bool {
        self.last_value.is_none() && self.status_label == LOADING_LABEL
    }
}
