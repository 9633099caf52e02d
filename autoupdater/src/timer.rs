//! Single-shot and repeating timers
//!
//! A `Timer` is a spawned tokio task that sleeps and then invokes a callback.
//! Every timer carries a sequence number handed out by its owner; the owner
//! keeps the number next to the timer and the callback compares against it,
//! so a timer that was cancelled (or replaced) while its callback was already
//! waiting on the owner's lock still observes that it is gone.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Shortest period a timer will actually sleep for
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest period a timer will actually sleep for
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn clamp_period(period: Duration) -> Duration {
    period.clamp(MIN_PERIOD, MAX_PERIOD)
}

fn deadline_after(period: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(period)
        .or_else(|| now.checked_add(MIN_PERIOD))
        .unwrap_or(now)
}

/// How a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once after the period elapses
    Once,
    /// Fires every period until cancelled or the callback declines
    Repeating,
}

/// Handle onto a spawned timer task
///
/// Dropping a `Timer` detaches the task rather than cancelling it; use
/// [`Timer::cancel`] to stop it.
#[derive(Debug)]
pub struct Timer {
    seq: u64,
    kind: TimerKind,
    period: Duration,
    handle: JoinHandle<()>,
}

impl Timer {
    /// Arm a timer that calls `on_fire` once after `delay`
    ///
    /// Delays outside `MIN_PERIOD..=MAX_PERIOD` are clamped into that range.
    pub fn once<F>(runtime: &Handle, seq: u64, delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = deadline_after(clamp_period(delay));
        let handle = runtime.spawn(async move {
            time::sleep_until(deadline).await;
            on_fire();
        });

        Self {
            seq,
            kind: TimerKind::Once,
            period: delay,
            handle,
        }
    }

    /// Arm a timer that calls `on_tick` every `period`
    ///
    /// The first tick happens one full period after arming. The timer stops
    /// on its own as soon as `on_tick` returns `false`. Ticks missed because
    /// the runtime was busy are delayed, not burst.
    pub fn repeating<F>(runtime: &Handle, seq: u64, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let every = clamp_period(period);
        let start = deadline_after(every);
        let handle = runtime.spawn(async move {
            let mut ticker = time::interval_at(start, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        });

        Self {
            seq,
            kind: TimerKind::Repeating,
            period,
            handle,
        }
    }

    /// Sequence number this timer was armed with
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether this is a single-shot or repeating timer
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// The period requested when arming
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the timer task has neither finished nor been cancelled
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Abort the timer task
    ///
    /// A callback that is already running completes; callers that need a hard
    /// guarantee also forget the sequence number so the callback can tell.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}
