//! Feeds of every notification a bus publishes
//!
//! A `NotificationFeed` is opened with `LocalBus::iter`. It sees all event
//! names, including ones nobody subscribed to, starting from the moment it
//! was opened.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::notification::Notification;

/// Receiving end of a bus tap
///
/// The feed owns its channel outright. Dropping it closes the channel, and
/// the bus stops forwarding to it on the next publish.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use event_bus::{EventBus, LocalBus};
///
/// let bus = LocalBus::<u32>::new();
/// let feed = bus.iter();
/// bus.publish("refresh", Some(7));
///
/// let notification = feed.recv_timeout(Duration::from_secs(1)).unwrap();
/// assert_eq!(notification.name, "refresh");
/// ```
#[derive(Debug)]
pub struct NotificationFeed<P> {
    rx: Receiver<Notification<P>>,
}

impl<P> NotificationFeed<P> {
    pub(crate) fn new(rx: Receiver<Notification<P>>) -> Self {
        Self { rx }
    }

    /// Wait up to `timeout` for the next notification
    ///
    /// `None` covers both an expired timeout and a bus that no longer exists.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification<P>> {
        match self.rx.recv_timeout(timeout) {
            Ok(notification) => Some(notification),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain what is already queued without blocking
    pub fn try_iter(&self) -> mpsc::TryIter<'_, Notification<P>> {
        self.rx.try_iter()
    }
}

/// Blocks on each `next()`; ends once every handle onto the bus is gone
impl<P> Iterator for NotificationFeed<P> {
    type Item = Notification<P>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
