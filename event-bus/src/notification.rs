//! Notifications delivered to bus subscribers
//!
//! Every call to `EventBus::publish` produces one `Notification`, handed by
//! reference to each handler subscribed under the event name and forwarded to
//! any open `NotificationFeed`.

use std::time::Instant;

/// A single published event
///
/// The payload is optional: plain signals carry nothing, richer publishers
/// attach the value that triggered the event.
///
/// # Example
///
/// ```rust,ignore
/// bus.on("prices-refreshed", |notification| {
///     println!("{} fired with {:?}", notification.name, notification.payload);
/// });
/// ```
#[derive(Debug, Clone)]
pub struct Notification<P> {
    /// The event name this notification was published under
    pub name: String,

    /// Optional payload attached by the publisher
    pub payload: Option<P>,

    /// When the notification was published
    pub timestamp: Instant,
}

impl<P> Notification<P> {
    /// Create a new notification stamped with the current instant
    pub fn new(name: impl Into<String>, payload: Option<P>) -> Self {
        Self {
            name: name.into(),
            payload,
            timestamp: Instant::now(),
        }
    }

    /// Create a payload-free signal
    pub fn signal(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// Whether a payload was attached
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

impl<P: PartialEq> PartialEq for Notification<P> {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp not included in equality
        self.name == other.name && self.payload == other.payload
    }
}
