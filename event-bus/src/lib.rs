//! Injectable Publish/Subscribe Bus
//!
//! A small, typed event bus keyed by event name. It is meant to be handed to
//! the components that need it rather than reached through a global
//! dispatcher.
//!
//! # Features
//!
//! - **Name-keyed Handlers**: Subscribe closures to an event name
//! - **Optional Payloads**: Plain signals or typed payloads
//! - **Re-entrant Delivery**: Handlers may publish or (un)subscribe
//! - **Notification Feeds**: Observe every publication, whatever its name
//! - **Swappable Implementation**: Depend on the `EventBus` trait, not `LocalBus`
//!
//! # Quick Start
//!
//! ```rust
//! use event_bus::{EventBus, LocalBus};
//!
//! let bus = LocalBus::<String>::new();
//! bus.on("greeting", |n| println!("got {:?}", n.payload));
//!
//! let delivered = bus.publish("greeting", Some("hello".to_string()));
//! assert_eq!(delivered, 1);
//! ```
//!
//! # Architecture
//!
//! ```text
//! LocalBus<P>
//!     │
//!     ├── handlers: DashMap<name, Vec<(SubscriptionId, Handler<P>)>>
//!     │
//!     ├── names: DashMap<SubscriptionId, name>
//!     │
//!     └── taps: Vec<mpsc::Sender<Notification<P>>>
//!             │
//!             └── NotificationFeed<P>
//! ```

pub mod bus;
pub mod iter;
pub mod notification;

pub use bus::{EventBus, Handler, LocalBus, SubscriptionId};
pub use iter::NotificationFeed;
pub use notification::Notification;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bus::{EventBus, Handler, LocalBus, SubscriptionId};
    pub use crate::iter::NotificationFeed;
    pub use crate::notification::Notification;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_full_workflow() {
        let bus = LocalBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = bus.on("counter", move |n| {
            sink.lock().unwrap().push(n.payload);
        });

        bus.publish("counter", Some(1));
        bus.publish("counter", None);
        bus.unsubscribe(id);
        bus.publish("counter", Some(3));

        assert_eq!(*seen.lock().unwrap(), vec![Some(1), None]);
    }

    #[test]
    fn test_trait_object_usage() {
        let bus: Arc<dyn EventBus<u32>> = Arc::new(LocalBus::new());
        let id = bus.subscribe("x", Arc::new(|_: &Notification<u32>| {}));

        assert_eq!(bus.subscriber_count("x"), 1);
        assert_eq!(bus.publish("x", Some(5)), 1);
        assert!(bus.unsubscribe(id));
    }
}
