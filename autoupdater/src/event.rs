//! Change feed events
//!
//! The engine emits a `ChangeEvent` for every lifecycle step of every updater.
//! Events only name the updater and what happened; read the record with
//! `AutoUpdater::get_record` to get the new value or label.

use std::fmt;
use std::time::Instant;

use crate::types::UpdaterId;

/// What happened to an updater
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Added to the registry, possibly replacing an updater with the same id
    Registered { replaced: bool },
    /// Began polling
    Started,
    /// A poll completed
    Polled { success: bool },
    /// A produced value was applied to the record
    ValueApplied,
    /// Entered the failed state
    Failed,
    /// Stopped polling
    Stopped,
    /// Removed from the registry
    Deregistered,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { replaced: false } => write!(f, "registered"),
            Self::Registered { replaced: true } => write!(f, "replaced"),
            Self::Started => write!(f, "started"),
            Self::Polled { success: true } => write!(f, "polled"),
            Self::Polled { success: false } => write!(f, "poll failed"),
            Self::ValueApplied => write!(f, "value applied"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Deregistered => write!(f, "deregistered"),
        }
    }
}

/// A change event emitted by the engine
///
/// # Example
///
/// ```rust,ignore
/// let mut changes = engine.changes();
/// while let Ok(event) = changes.recv().await {
///     if event.kind == ChangeKind::ValueApplied {
///         if let Some(record) = engine.get_record(event.id.as_str()) {
///             println!("{} = {:?}", event.id, record.last_value);
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The updater the event is about
    pub id: UpdaterId,

    /// What happened
    pub kind: ChangeKind,

    /// When the engine emitted the event
    pub timestamp: Instant,
}

impl ChangeEvent {
    /// Create a new change event
    pub fn new(id: UpdaterId, kind: ChangeKind) -> Self {
        Self {
            id,
            kind,
            timestamp: Instant::now(),
        }
    }
}

impl PartialEq for ChangeEvent {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp not included in equality
        self.id == other.id && self.kind == other.kind
    }
}
