//! The `EventBus` contract and its in-process implementation
//!
//! Publishers and subscribers agree on nothing but an event name. Handlers are
//! registered under a name and invoked synchronously, in subscription order,
//! every time something is published under that name.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use dashmap::DashMap;

use crate::iter::NotificationFeed;
use crate::notification::Notification;

/// Callback invoked for every notification published under a subscribed name
pub type Handler<P> = Arc<dyn Fn(&Notification<P>) + Send + Sync>;

/// Handle returned by `subscribe`, used to cancel the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Create a SubscriptionId from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Publish/subscribe channel keyed by event name
///
/// Implementations must tolerate re-entrancy: a handler may publish, subscribe
/// or unsubscribe while it is being invoked.
pub trait EventBus<P>: Send + Sync {
    /// Publish under `name`, returning how many handlers were invoked
    fn publish(&self, name: &str, payload: Option<P>) -> usize;

    /// Register `handler` for every future publication under `name`
    fn subscribe(&self, name: &str, handler: Handler<P>) -> SubscriptionId;

    /// Cancel a subscription, returning whether it existed
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Number of handlers currently subscribed under `name`
    fn subscriber_count(&self, name: &str) -> usize;
}

/// In-process event bus
///
/// Cloning a `LocalBus` yields another handle onto the same handler table.
///
/// # Example
///
/// ```rust
/// use event_bus::{EventBus, LocalBus};
///
/// let bus = LocalBus::<u32>::new();
/// let id = bus.on("refresh", |n| assert_eq!(n.payload, Some(7)));
///
/// assert_eq!(bus.publish("refresh", Some(7)), 1);
/// assert!(bus.unsubscribe(id));
/// assert_eq!(bus.publish("refresh", Some(7)), 0);
/// ```
pub struct LocalBus<P> {
    /// Handlers per event name, in subscription order
    handlers: Arc<DashMap<String, Vec<(SubscriptionId, Handler<P>)>>>,

    /// Reverse lookup from subscription to event name
    names: Arc<DashMap<SubscriptionId, String>>,

    /// Counter for generating subscription IDs
    next_id: Arc<AtomicU64>,

    /// Senders feeding open `NotificationFeed`s
    taps: Arc<Mutex<Vec<mpsc::Sender<Notification<P>>>>>,
}

impl<P> LocalBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
            names: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            taps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe a plain closure under `name`
    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification<P>) + Send + Sync + 'static,
    {
        self.subscribe(name, Arc::new(handler))
    }

    /// Open a feed of every notification published from now on
    pub fn iter(&self) -> NotificationFeed<P> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut taps) = self.taps.lock() {
            taps.push(tx);
        }
        NotificationFeed::new(rx)
    }

    /// Event names that currently have at least one handler
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.handlers.clear();
        self.names.clear();
    }

    fn forward_to_taps(&self, notification: &Notification<P>) {
        if let Ok(mut taps) = self.taps.lock() {
            // Receivers that were dropped are forgotten here
            taps.retain(|tx| tx.send(notification.clone()).is_ok());
        }
    }
}

impl<P> EventBus<P> for LocalBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn publish(&self, name: &str, payload: Option<P>) -> usize {
        let notification = Notification::new(name, payload);

        // Snapshot the handlers so none of them runs under a map guard
        let handlers: Vec<Handler<P>> = self
            .handlers
            .get(name)
            .map(|entry| entry.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        tracing::trace!(event = name, handlers = handlers.len(), "publishing");

        for handler in &handlers {
            handler(&notification);
        }

        self.forward_to_taps(&notification);

        handlers.len()
    }

    fn subscribe(&self, name: &str, handler: Handler<P>) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.handlers
            .entry(name.to_string())
            .or_default()
            .push((id, handler));
        self.names.insert(id, name.to_string());

        tracing::debug!(event = name, subscription = %id, "subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, name)) = self.names.remove(&id) else {
            return false;
        };

        let now_empty = match self.handlers.get_mut(&name) {
            Some(mut entry) => {
                entry.retain(|(sid, _)| *sid != id);
                entry.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.handlers.remove_if(&name, |_, handlers| handlers.is_empty());
        }

        tracing::debug!(event = %name, subscription = %id, "unsubscribed");
        true
    }

    fn subscriber_count(&self, name: &str) -> usize {
        self.handlers.get(name).map(|e| e.len()).unwrap_or(0)
    }
}

impl<P> Default for LocalBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for LocalBus<P> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            names: Arc::clone(&self.names),
            next_id: Arc::clone(&self.next_id),
            taps: Arc::clone(&self.taps),
        }
    }
}

impl<P> fmt::Debug for LocalBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBus")
            .field("event_count", &self.handlers.len())
            .field("subscription_count", &self.names.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Notification<i32>) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (count, move |_: &Notification<i32>| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = LocalBus::<i32>::new();
        assert_eq!(bus.publish("nobody", None), 0);
    }

    #[test]
    fn test_publish_reaches_only_matching_name() {
        let bus = LocalBus::<i32>::new();
        let (refresh_count, refresh_handler) = counter();
        let (other_count, other_handler) = counter();

        bus.on("refresh", refresh_handler);
        bus.on("other", other_handler);

        assert_eq!(bus.publish("refresh", Some(1)), 1);
        assert_eq!(refresh_count.load(Ordering::SeqCst), 1);
        assert_eq!(other_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let bus = LocalBus::<i32>::new();
        let a = bus.on("refresh", |_| {});
        let b = bus.on("refresh", |_| {});

        assert_ne!(a, b);
        assert_eq!(bus.subscriber_count("refresh"), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = LocalBus::<i32>::new();
        let (count, handler) = counter();
        let id = bus.on("refresh", handler);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count("refresh"), 0);
        assert!(bus.event_names().is_empty());

        bus.publish("refresh", None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_can_reenter_bus() {
        let bus = LocalBus::<i32>::new();
        let (count, handler) = counter();
        bus.on("second", handler);

        let inner = bus.clone();
        bus.on("first", move |_| {
            inner.publish("second", None);
            inner.on("late", |_| {});
        });

        assert_eq!(bus.publish("first", None), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("late"), 1);
    }

    #[test]
    fn test_dropped_iter_is_forgotten() {
        let bus = LocalBus::<i32>::new();
        drop(bus.iter());

        bus.publish("a", None);
        assert!(bus.taps.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clone_shares_handlers() {
        let bus = LocalBus::<i32>::new();
        let clone = bus.clone();
        let (count, handler) = counter();

        clone.on("refresh", handler);
        bus.publish("refresh", None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bus.iter().recv_timeout(Duration::from_millis(10)).is_none());
    }
}
