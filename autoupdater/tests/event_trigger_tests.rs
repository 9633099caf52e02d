//! Integration tests for bus-driven behaviour.
//!
//! These tests share a `LocalBus` between the engine and the test and verify:
//! - `broadcast_event` is published after each successful poll
//! - `listen_event` forces an immediate poll
//! - Values are applied one tick after the poll settles
//! - Listener subscriptions follow config changes and deregistration


use std::sync::{Arc, Mutex};

use autoupdater::prelude::*;
use serde_json::json;
use test_helpers::{counting, failing, ms, settle, Probe};

fn engine_with_bus() -> (AutoUpdater, LocalBus<Value>) {
    let bus = LocalBus::<Value>::new();
    let engine = AutoUpdater::builder()
        .bus(Arc::new(bus.clone()))
        .build()
        .unwrap();
    (engine, bus)
}

fn record_payloads(bus: &LocalBus<Value>, name: &str) -> Arc<Mutex<Vec<Option<Value>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.on(name, move |n| sink.lock().unwrap().push(n.payload.clone()));
    seen
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_after_each_successful_poll() {
    let (engine, bus) = engine_with_bus();
    let probe = Probe::new();
    let seen = record_payloads(&bus, "clock-refreshed");

    let patch = ConfigPatch::new()
        .with_refresh_timer(ms(100))
        .with_broadcast_event("clock-refreshed");
    engine.register(counting(&probe), None, Some(patch)).unwrap();

    tokio::time::sleep(ms(250)).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_polls_are_not_broadcast() {
    let (engine, bus) = engine_with_bus();
    let probe = Probe::new();
    let seen = record_payloads(&bus, "feed-refreshed");

    let patch = ConfigPatch::new()
        .with_refresh_timer(ms(100))
        .with_max_failures(MaxFailures::Never)
        .with_broadcast_event("feed-refreshed");
    engine.register(failing(&probe), None, Some(patch)).unwrap();

    tokio::time::sleep(ms(350)).await;
    assert_eq!(probe.calls(), 4);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_value_lands_after_poll_settles() {
    let (engine, bus) = engine_with_bus();
    let probe = Probe::new();
    let changes = Arc::new(Mutex::new(engine.changes()));
    let observed = Arc::new(Mutex::new(Vec::new()));

    // The broadcast goes out after the poll settles and before the value lands
    let view = engine.clone();
    let feed = Arc::clone(&changes);
    let sink = Arc::clone(&observed);
    bus.on("clock-polled", move |_| {
        let mut kinds = Vec::new();
        while let Ok(event) = feed.lock().unwrap().try_recv() {
            kinds.push(event.kind);
        }
        let record = view.get_record("clock").unwrap();
        sink.lock().unwrap().push((kinds, record.is_loading(), record.poll_count));
    });

    let patch = ConfigPatch::new()
        .without_refresh_timer()
        .with_broadcast_event("clock-polled");
    engine.register(counting(&probe), Some("clock"), Some(patch)).unwrap();
    settle().await;

    let seen = observed.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![(
            vec![
                ChangeKind::Registered { replaced: false },
                ChangeKind::Started,
                ChangeKind::Polled { success: true },
            ],
            true,
            1,
        )]
    );

    let event = changes.lock().unwrap().try_recv().unwrap();
    assert_eq!(event.kind, ChangeKind::ValueApplied);
    let record = engine.get_record("clock").unwrap();
    assert!(!record.is_loading());
    assert_eq!(record.last_value, Some(json!(1)));

    // The handler holds an engine handle
    bus.clear();
}

#[tokio::test(start_paused = true)]
async fn test_listen_event_forces_poll() {
    let (engine, bus) = engine_with_bus();
    let probe = Probe::new();

    let patch = ConfigPatch::new()
        .with_refresh_timer(ms(10_000))
        .with_listen_event("reload");
    let id = engine.register(counting(&probe), None, Some(patch)).unwrap();
    settle().await;
    assert_eq!(probe.calls(), 1);
    assert_eq!(bus.subscriber_count("reload"), 1);

    assert_eq!(bus.publish("reload", None), 1);
    settle().await;
    assert_eq!(probe.calls(), 2);
    assert_eq!(engine.get_record(&id).unwrap().last_value, Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_chains_into_listener() {
    let (engine, _bus) = engine_with_bus();
    let source = Probe::new();
    let follower = Probe::new();

    let upstream = ConfigPatch::new()
        .with_refresh_timer(ms(100))
        .with_broadcast_event("prices");
    let downstream = ConfigPatch::new()
        .without_refresh_timer()
        .with_listen_event("prices");

    engine.register(counting(&follower), Some("total"), Some(downstream)).unwrap();
    engine.register(counting(&source), Some("prices"), Some(upstream)).unwrap();

    tokio::time::sleep(ms(250)).await;
    assert_eq!(source.calls(), 3);
    // One initial poll plus one per upstream success
    assert_eq!(follower.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_listener_follows_config_changes() {
    let (engine, bus) = engine_with_bus();
    let probe = Probe::new();

    let patch = ConfigPatch::new()
        .without_refresh_timer()
        .with_listen_event("old");
    let id = engine.register(counting(&probe), None, Some(patch)).unwrap();
    settle().await;

    engine.modify_config(&id, ConfigPatch::new().with_listen_event("new"));
    assert_eq!(bus.subscriber_count("old"), 0);
    assert_eq!(bus.subscriber_count("new"), 1);

    bus.publish("old", None);
    settle().await;
    assert_eq!(probe.calls(), 1);

    bus.publish("new", None);
    settle().await;
    assert_eq!(probe.calls(), 2);

    engine.modify_config(&id, ConfigPatch::new().without_listen_event());
    assert_eq!(bus.subscriber_count("new"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deregister_and_replace_drop_listeners() {
    let (engine, bus) = engine_with_bus();
    let listening = || {
        Some(
            ConfigPatch::new()
                .with_auto_start(false)
                .with_listen_event("reload"),
        )
    };

    engine.register(counting(&Probe::new()), Some("a"), listening()).unwrap();
    engine.register(counting(&Probe::new()), Some("a"), listening()).unwrap();
    assert_eq!(bus.subscriber_count("reload"), 1);

    engine.deregister("a");
    assert_eq!(bus.subscriber_count("reload"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_engine_releases_listeners() {
    let (engine, bus) = engine_with_bus();
    let patch = ConfigPatch::new()
        .without_refresh_timer()
        .with_listen_event("reload");

    engine.register(counting(&Probe::new()), None, Some(patch)).unwrap();
    settle().await;
    assert_eq!(bus.subscriber_count("reload"), 1);

    drop(engine);
    assert_eq!(bus.subscriber_count("reload"), 0);
}
