//! Basic AutoUpdater Example
//!
//! Registers a few updaters against simulated sources and prints what a
//! presentation layer would render as the change feed reports progress:
//! a clock that always works, a flaky sensor that gives up after two failed
//! polls, and a total that refreshes whenever the prices broadcast.
//!
//! Run with: `cargo run -p autoupdater --example basic_usage`
//! Set `AUTOUPDATER_LOG_MODE=development` to see engine logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autoupdater::logging;
use autoupdater::numeric;
use autoupdater::prelude::*;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging_from_env()?;

    println!("AutoUpdater Basic Example");
    println!("=========================\n");

    let engine = AutoUpdater::new()?;
    let mut changes = engine.changes();

    // A clock that ticks every 500ms
    let ticks = Arc::new(AtomicU64::new(0));
    let clock_ticks = Arc::clone(&ticks);
    engine.register(
        producer::from_fn(move |_| Ok(Some(json!(clock_ticks.fetch_add(1, Ordering::SeqCst))))),
        Some("clock"),
        Some(ConfigPatch::new().with_refresh_timer(Duration::from_millis(500))),
    )?;

    // A sensor that stops answering after its first reading
    let readings = Arc::new(AtomicU64::new(0));
    let sensor_readings = Arc::clone(&readings);
    engine.register(
        numeric::numeric(producer::from_async(move |_args| {
            let n = sensor_readings.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if n == 0 {
                    Ok(Some(json!("21.5")))
                } else {
                    Err(ProducerError::failed("sensor timed out"))
                }
            }
        })),
        Some("sensor"),
        Some(
            ConfigPatch::new()
                .with_refresh_timer(Duration::from_millis(400))
                .with_failure_value("--")
                .with_failure_label("Sensor offline."),
        ),
    )?;

    // Prices broadcast after every poll; the total listens and refreshes
    engine.register(
        producer::from_fn(|args| {
            let symbols = args.len() as u64;
            Ok(Some(json!(symbols * 100)))
        }),
        Some("prices"),
        Some(
            ConfigPatch::new()
                .with_refresh_timer(Duration::from_secs(1))
                .with_broadcast_event("prices-refreshed")
                .with_call_args(CallArgs::new().with("AAPL").with("MSFT")),
        ),
    )?;
    engine.register(
        producer::constant("recomputed"),
        Some("total"),
        Some(
            ConfigPatch::new()
                .without_refresh_timer()
                .with_listen_event("prices-refreshed"),
        ),
    )?;

    let deadline = tokio::time::sleep(Duration::from_secs(3));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = changes.recv() => match event {
                Ok(event) => render(&engine, &event),
                Err(RecvError::Lagged(skipped)) => println!("  (skipped {} events)", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("\n{}", engine.stats());

    let removed = engine.shutdown();
    println!("Shut down {} updaters", removed);
    Ok(())
}

fn render(engine: &AutoUpdater, event: &ChangeEvent) {
    if !matches!(event.kind, ChangeKind::ValueApplied | ChangeKind::Failed) {
        return;
    }

    if let Some(record) = engine.get_record(&event.id) {
        let value = record
            .last_value
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        println!(
            "  {:<8} {:<14} {}",
            record.id,
            value,
            record.status_label
        );
    }
}
