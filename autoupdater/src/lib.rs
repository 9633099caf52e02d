//! Timer-driven Updaters with Failure Accounting
//!
//! This crate keeps a registry of *updaters*: caller-supplied producers that
//! are polled on a timer. The engine tracks consecutive failures, gives up
//! after a configurable threshold, and exposes the latest value and a status
//! label to whatever presentation layer reads it.
//!
//! # Features
//!
//! - **Sync or Async Producers**: Both are driven through the same `Producer` contract
//! - **Dynamic or Static Refresh**: Re-arm after each poll settles, or tick on a fixed period
//! - **Circuit Breaker**: Publish a failure value and label after too many failed polls
//! - **Event Triggers**: Broadcast after each poll, force a poll when an event is published
//! - **Change Feed**: React to lifecycle changes instead of re-reading records
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use autoupdater::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RegistryError> {
//!     let engine = AutoUpdater::new()?;
//!
//!     let id = engine.register(
//!         producer::from_async(|_args| async { Ok(Some(json!(21.5))) }),
//!         Some("temperature"),
//!         Some(ConfigPatch::new().with_refresh_timer(Duration::from_secs(5))),
//!     )?;
//!
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     let record = engine.get_record(&id).unwrap();
//!     println!("{} = {:?}", id, record.last_value);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! AutoUpdater (Clone, shared Inner)
//!     │
//!     ├── updaters: Mutex<HashMap<UpdaterId, Entry>>
//!     │       │
//!     │       └── Entry ── producer, config, failures, value, label
//!     │               │
//!     │               └── Timer (once | repeating, sequence-fenced)
//!     │
//!     ├── bus: Arc<dyn EventBus<Value>>  ◄── broadcast_event / listen_event
//!     │
//!     └── changes: broadcast::Sender<ChangeEvent>
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod numeric;
pub mod producer;
pub mod record;
pub mod timer;
pub mod types;

pub use config::{ConfigPatch, UpdaterConfig};
pub use engine::{AutoUpdater, AutoUpdaterBuilder, EngineStats, UpdaterStats};
pub use error::{ConfigError, ProducerError, RegistryError, RegistryResult};
pub use event::{ChangeEvent, ChangeKind};
pub use producer::{Producer, ProducerResult, SharedProducer};
pub use record::{UpdaterRecord, UpdaterState, LOADING_LABEL};
pub use types::{CallArgs, MaxFailures, UpdaterId, Value, WaitFor};

// Re-export the bus so callers can share one with the engine
pub use event_bus::{EventBus, LocalBus, Notification, SubscriptionId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigPatch, UpdaterConfig};
    pub use crate::engine::AutoUpdater;
    pub use crate::error::{ProducerError, RegistryError};
    pub use crate::event::{ChangeEvent, ChangeKind};
    pub use crate::producer::{self, Producer, ProducerResult};
    pub use crate::record::{UpdaterRecord, UpdaterState};
    pub use crate::types::{CallArgs, MaxFailures, UpdaterId, Value, WaitFor};
    pub use event_bus::{EventBus, LocalBus};
}
