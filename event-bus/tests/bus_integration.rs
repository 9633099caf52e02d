//! Integration tests for the event bus.
//!
//! These tests verify:
//! - Delivery across threads
//! - Re-entrant publish and unsubscribe from inside handlers
//! - Notification iterators alongside handlers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use event_bus::prelude::*;

#[test]
fn test_publish_from_many_threads() {
    let bus = LocalBus::<usize>::new();
    let total = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&total);
    bus.on("add", move |n| {
        sink.fetch_add(n.payload.unwrap_or(0), Ordering::SeqCst);
    });

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 1..=100 {
                    bus.publish("add", Some(i));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(total.load(Ordering::SeqCst), 4 * 5050);
}

#[test]
fn test_handler_can_chain_events() {
    let bus = LocalBus::<String>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let relay = bus.clone();
    bus.on("raw", move |n| {
        let upper = n.payload.as_deref().map(str::to_uppercase);
        relay.publish("cooked", upper);
    });

    let sink = Arc::clone(&seen);
    bus.on("cooked", move |n| {
        sink.lock().unwrap().push(n.payload.clone());
    });

    assert_eq!(bus.publish("raw", Some("hello".to_string())), 1);
    assert_eq!(*seen.lock().unwrap(), vec![Some("HELLO".to_string())]);
}

#[test]
fn test_one_shot_handler_unsubscribes_itself() {
    let bus = LocalBus::<()>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let own_id = Arc::new(Mutex::new(None::<SubscriptionId>));

    let handle = bus.clone();
    let counter = Arc::clone(&calls);
    let slot = Arc::clone(&own_id);
    let id = bus.on("once", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(id) = slot.lock().unwrap().take() {
            handle.unsubscribe(id);
        }
    });
    *own_id.lock().unwrap() = Some(id);

    bus.publish("once", None);
    bus.publish("once", None);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscriber_count("once"), 0);
    assert!(bus.event_names().is_empty());
}

#[test]
fn test_iterator_sees_every_event_name() {
    let bus = LocalBus::<i32>::new();
    let feed = bus.iter();

    bus.publish("a", Some(1));
    bus.publish("b", None);

    let names: Vec<String> = feed.try_iter().map(|n| n.name).collect();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_iterator_receives_from_other_thread() {
    let bus = LocalBus::<i32>::new();
    let feed = bus.iter();

    let publisher = bus.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        publisher.publish("late", Some(9));
    });

    let notification = feed.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(notification.name, "late");
    assert_eq!(notification.payload, Some(9));
    worker.join().unwrap();

    assert!(feed.recv_timeout(Duration::from_millis(10)).is_none());
}

#[test]
fn test_shared_through_trait_object() {
    let bus: Arc<dyn EventBus<i32>> = Arc::new(LocalBus::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    let handler: Handler<i32> = Arc::new(move |_: &Notification<i32>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let first = bus.subscribe("tick", Arc::clone(&handler));
    let second = bus.subscribe("tick", handler);

    assert_ne!(first, second);
    assert_eq!(bus.publish("tick", None), 2);
    assert!(bus.unsubscribe(first));
    assert!(!bus.unsubscribe(first));
    assert_eq!(bus.publish("tick", None), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
