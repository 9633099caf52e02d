//! The updater registry and poll engine
//!
//! `AutoUpdater` owns every registered updater behind a single lock. Public
//! operations are synchronous: they mutate the registry under the lock and
//! spawn whatever asynchronous work follows (producer calls, timers, start
//! gates) onto the tokio runtime captured at construction.
//!
//! The lock is never held across an `.await`, while a producer runs, or while
//! bus handlers run. Anything that resumes after a suspension point re-checks
//! that its updater still exists under the same generation and is running.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use event_bus::{EventBus, LocalBus, Notification, SubscriptionId};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigPatch, UpdaterConfig};
use crate::error::{ConfigError, RegistryError, RegistryResult};
use crate::event::{ChangeEvent, ChangeKind};
use crate::producer::{ProducerResult, SharedProducer};
use crate::record::{UpdaterRecord, UpdaterState, LOADING_LABEL};
use crate::timer::{Timer, TimerKind};
use crate::types::{UpdaterId, Value};

/// Default capacity of the change feed
pub const DEFAULT_CHANGE_CAPACITY: usize = 256;

// ============================================================================
// Registry entries
// ============================================================================

struct Entry {
    id: UpdaterId,

    /// Bumped on every registration; fences timers and polls of replaced entries
    generation: u64,

    producer: SharedProducer,
    config: UpdaterConfig,
    failures: u32,
    value: Option<Value>,
    label: String,
    running: bool,
    failed: bool,

    /// At most one armed timer, owned exclusively by the entry
    timer: Option<Timer>,

    poll_count: u64,
    last_error: Option<String>,
    listener: Option<SubscriptionId>,
}

impl Entry {
    fn new(
        id: UpdaterId,
        generation: u64,
        producer: SharedProducer,
        config: UpdaterConfig,
        listener: Option<SubscriptionId>,
    ) -> Self {
        Self {
            id,
            generation,
            producer,
            config,
            failures: 0,
            value: None,
            label: LOADING_LABEL.to_string(),
            running: false,
            failed: false,
            timer: None,
            poll_count: 0,
            last_error: None,
            listener,
        }
    }

    /// Whether work started under `generation` may still touch this entry
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.running
    }

    fn timer_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(Timer::is_active)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Stop polling, returning whether the entry was running
    fn halt(&mut self) -> bool {
        let was_running = self.running;
        self.running = false;
        self.cancel_timer();
        was_running
    }

    fn enter_failed(&mut self) {
        self.halt();
        self.value = Some(self.config.failure_value.clone());
        self.label = self.config.failure_label.clone();
        self.failed = true;
    }

    fn snapshot(&self) -> UpdaterRecord {
        UpdaterRecord {
            id: self.id.clone(),
            config: self.config.clone(),
            consecutive_failures: self.failures,
            last_value: self.value.clone(),
            status_label: self.label.clone(),
            running: self.running,
            failed: self.failed,
            timer_armed: self.timer_armed(),
            poll_count: self.poll_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// What a settled poll still has to do once the lock is released
#[derive(Default)]
struct PollOutcome {
    broadcast: Option<(String, Option<Value>)>,
    value: Option<Value>,
}

// ============================================================================
// Shared engine state
// ============================================================================

struct Inner {
    updaters: Mutex<HashMap<UpdaterId, Entry>>,
    defaults: RwLock<UpdaterConfig>,
    bus: Arc<dyn EventBus<Value>>,
    runtime: Handle,
    changes: broadcast::Sender<ChangeEvent>,
    next_generation: AtomicU64,
    next_timer: AtomicU64,
}

impl Inner {
    fn emit(&self, id: &UpdaterId, kind: ChangeKind) {
        // No receivers is fine
        let _ = self.changes.send(ChangeEvent::new(id.clone(), kind));
    }

    fn register(
        self: &Arc<Self>,
        producer: SharedProducer,
        id: Option<&str>,
        patch: Option<ConfigPatch>,
        unique: bool,
    ) -> RegistryResult<UpdaterId> {
        let id = match id {
            Some(raw) => UpdaterId::parse(raw)?,
            None => UpdaterId::generate(),
        };

        let config = {
            let defaults = self.defaults.read();
            match &patch {
                Some(patch) => defaults.merged(patch),
                None => defaults.clone(),
            }
        };
        config.validate()?;

        let auto_start = config.auto_start;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let listener = config
            .listen_event
            .as_deref()
            .map(|name| self.listen(name, &id));
        let entry = Entry::new(id.clone(), generation, producer, config, listener);

        let inserted = {
            let mut updaters = self.updaters.lock();
            if unique && updaters.contains_key(&id) {
                None
            } else {
                let previous = updaters.insert(id.clone(), entry);
                self.emit(
                    &id,
                    ChangeKind::Registered {
                        replaced: previous.is_some(),
                    },
                );
                Some(previous)
            }
        };

        let previous = match inserted {
            Some(previous) => previous,
            None => {
                if let Some(subscription) = listener {
                    self.bus.unsubscribe(subscription);
                }
                debug!(updater = %id, "register_unique: identifier already in use");
                return Err(RegistryError::AlreadyRegistered(id));
            }
        };

        if let Some(mut old) = previous {
            // The old timer is left to find its generation gone on its next tick
            warn!(
                updater = %id,
                old_generation = old.generation,
                "replacing existing updater with the same identifier"
            );
            old.timer = None;
            if let Some(subscription) = old.listener.take() {
                self.bus.unsubscribe(subscription);
            }
        }

        info!(updater = %id, generation, auto_start, "registered updater");

        if auto_start {
            self.start(id.as_str());
        }

        Ok(id)
    }

    /// Subscribe `id` to forced updates whenever `name` is published
    fn listen(self: &Arc<Self>, name: &str, id: &UpdaterId) -> SubscriptionId {
        let weak = Arc::downgrade(self);
        let id = id.clone();

        self.bus.subscribe(
            name,
            Arc::new(move |notification: &Notification<Value>| {
                if let Some(inner) = weak.upgrade() {
                    debug!(updater = %id, event = %notification.name, "listen event received");
                    inner.update(id.as_str(), true);
                }
            }),
        )
    }

    fn start(self: &Arc<Self>, id: &str) -> bool {
        let mut updaters = self.updaters.lock();
        let Some(entry) = updaters.get_mut(id) else {
            debug!(updater = id, "start: unknown updater");
            return false;
        };

        if entry.running {
            trace!(updater = id, "start: already running");
            return true;
        }

        entry.running = true;
        entry.failed = false;
        info!(updater = id, "starting updater");
        self.emit(&entry.id, ChangeKind::Started);

        if entry.timer.is_none() {
            let (id, generation) = (entry.id.clone(), entry.generation);
            match entry.config.wait_for.clone() {
                Some(gate) => {
                    debug!(updater = %id, "first poll waits for start gate");
                    let weak = Arc::downgrade(self);
                    self.runtime.spawn(async move {
                        gate.wait().await;
                        if let Some(inner) = weak.upgrade() {
                            inner.run_poll(id, generation).await;
                        }
                    });
                }
                None => self.spawn_poll(id, generation),
            }
        }

        true
    }

    fn update(self: &Arc<Self>, id: &str, force: bool) -> bool {
        let mut updaters = self.updaters.lock();
        let Some(entry) = updaters.get_mut(id) else {
            debug!(updater = id, "update: unknown updater");
            return false;
        };

        debug!(updater = id, force, "update requested");

        if !entry.running {
            debug!(updater = id, "update ignored: updater is not running");
            return true;
        }

        if force {
            entry.cancel_timer();
        }

        if entry.timer.is_none() {
            self.spawn_poll(entry.id.clone(), entry.generation);
        }

        true
    }

    fn stop(&self, id: &str) -> bool {
        let mut updaters = self.updaters.lock();
        let Some(entry) = updaters.get_mut(id) else {
            debug!(updater = id, "stop: unknown updater");
            return false;
        };

        if entry.halt() {
            info!(updater = id, "stopped updater");
            self.emit(&entry.id, ChangeKind::Stopped);
        }
        true
    }

    fn fail(&self, id: &str) -> bool {
        let mut updaters = self.updaters.lock();
        let Some(entry) = updaters.get_mut(id) else {
            debug!(updater = id, "fail: unknown updater");
            return false;
        };

        entry.enter_failed();
        info!(updater = id, "updater put into failed state");
        self.emit(&entry.id, ChangeKind::Failed);
        true
    }

    fn modify_config(self: &Arc<Self>, id: &str, patch: &ConfigPatch) -> Option<UpdaterConfig> {
        let (config, rewire) = {
            let mut updaters = self.updaters.lock();
            let Some(entry) = updaters.get_mut(id) else {
                debug!(updater = id, "modify_config: unknown updater");
                return None;
            };

            let merged = entry.config.merged(patch);
            if let Err(error) = merged.validate() {
                warn!(updater = id, %error, "rejecting config change");
                return Some(entry.config.clone());
            }

            let listen_changed = merged.listen_event != entry.config.listen_event;
            entry.config = merged;
            debug!(updater = id, listen_changed, "config modified");

            let rewire = listen_changed.then(|| {
                (
                    entry.listener.take(),
                    entry.config.listen_event.clone(),
                    entry.generation,
                    entry.id.clone(),
                )
            });
            (entry.config.clone(), rewire)
        };

        if let Some((old, listen, generation, uid)) = rewire {
            if let Some(subscription) = old {
                self.bus.unsubscribe(subscription);
            }

            if let Some(name) = listen {
                let subscription = self.listen(&name, &uid);
                let attached = {
                    let mut updaters = self.updaters.lock();
                    match updaters.get_mut(id) {
                        Some(entry)
                            if entry.generation == generation
                                && entry.listener.is_none()
                                && entry.config.listen_event.as_deref() == Some(name.as_str()) =>
                        {
                            entry.listener = Some(subscription);
                            true
                        }
                        _ => false,
                    }
                };
                if !attached {
                    self.bus.unsubscribe(subscription);
                }
            }
        }

        Some(config)
    }

    fn deregister(&self, id: &str) -> bool {
        let removed = self.updaters.lock().remove(id);
        let Some(mut entry) = removed else {
            debug!(updater = id, "deregister: unknown updater");
            return false;
        };

        entry.halt();
        if let Some(subscription) = entry.listener.take() {
            self.bus.unsubscribe(subscription);
        }

        info!(updater = id, polls = entry.poll_count, "deregistered updater");
        self.emit(&entry.id, ChangeKind::Deregistered);
        true
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    fn spawn_poll(self: &Arc<Self>, id: UpdaterId, generation: u64) {
        let inner = Arc::clone(self);
        self.runtime.spawn(inner.run_poll(id, generation));
    }

    async fn run_poll(self: Arc<Self>, id: UpdaterId, generation: u64) {
        let call = {
            let updaters = self.updaters.lock();
            updaters
                .get(&id)
                .filter(|entry| entry.is_current(generation))
                .map(|entry| (Arc::clone(&entry.producer), entry.config.call_args.clone()))
        };

        let Some((producer, args)) = call else {
            trace!(updater = %id, "poll skipped: updater stopped or replaced");
            return;
        };

        debug!(updater = %id, "polling");
        let result = producer.produce(args).await;

        let Some(outcome) = self.settle_poll(&id, generation, result) else {
            return;
        };

        if let Some((name, payload)) = outcome.broadcast {
            let delivered = self.bus.publish(&name, payload);
            trace!(updater = %id, event = %name, delivered, "broadcast published");
        }

        if let Some(value) = outcome.value {
            // Values land one scheduler tick after the poll settles
            tokio::task::yield_now().await;
            self.apply_value(&id, generation, value);
        }
    }

    /// Record a poll result and arm the next tick
    fn settle_poll(
        self: &Arc<Self>,
        id: &UpdaterId,
        generation: u64,
        result: ProducerResult,
    ) -> Option<PollOutcome> {
        let mut updaters = self.updaters.lock();
        let entry = match updaters.get_mut(id) {
            Some(entry) if entry.is_current(generation) => entry,
            _ => {
                debug!(updater = %id, "discarding poll result: updater stopped or replaced");
                return None;
            }
        };

        entry.poll_count += 1;

        let outcome = match result {
            Ok(value) => {
                entry.failures = 0;
                entry.last_error = None;
                trace!(updater = %id, has_value = value.is_some(), "poll succeeded");
                self.emit(id, ChangeKind::Polled { success: true });

                let broadcast = entry
                    .config
                    .broadcast_event
                    .clone()
                    .map(|name| (name, value.clone()));

                // A null result carries no value, same as `None`
                PollOutcome {
                    broadcast,
                    value: value.filter(|value| !value.is_null()),
                }
            }
            Err(error) => {
                entry.failures = entry.failures.saturating_add(1);
                if error.is_bad_value() {
                    warn!(updater = %id, failures = entry.failures, %error, "producer returned a bad value");
                } else {
                    debug!(updater = %id, failures = entry.failures, %error, "poll failed");
                }
                entry.last_error = Some(error.to_string());
                self.emit(id, ChangeKind::Polled { success: false });

                if entry.config.max_failures.is_reached(entry.failures) {
                    warn!(
                        updater = %id,
                        failures = entry.failures,
                        max_failures = %entry.config.max_failures,
                        "too many consecutive failures, giving up"
                    );
                    entry.enter_failed();
                    self.emit(id, ChangeKind::Failed);
                }

                PollOutcome::default()
            }
        };

        if entry.running {
            self.schedule_next(entry);
        }

        Some(outcome)
    }

    fn apply_value(&self, id: &UpdaterId, generation: u64, value: Value) {
        let mut updaters = self.updaters.lock();
        match updaters.get_mut(id) {
            Some(entry) if entry.is_current(generation) => {
                entry.value = Some(value);
                entry.label.clear();
                self.emit(id, ChangeKind::ValueApplied);
            }
            _ => trace!(updater = %id, "value discarded: updater stopped or replaced"),
        }
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    fn schedule_next(self: &Arc<Self>, entry: &mut Entry) {
        let Some(period) = entry.config.refresh_timer else {
            entry.cancel_timer();
            return;
        };

        if entry.config.dynamic_refresh {
            entry.cancel_timer();
            entry.timer = Some(self.arm(entry, TimerKind::Once, period));
            return;
        }

        let keep = entry.timer.as_ref().is_some_and(|timer| {
            timer.kind() == TimerKind::Repeating && timer.is_active() && timer.period() == period
        });
        if !keep {
            entry.cancel_timer();
            entry.timer = Some(self.arm(entry, TimerKind::Repeating, period));
        }
    }

    fn arm(self: &Arc<Self>, entry: &Entry, kind: TimerKind, period: Duration) -> Timer {
        let seq = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(self);
        let id = entry.id.clone();
        let generation = entry.generation;

        trace!(updater = %id, seq, ?kind, ?period, "arming timer");

        let fire = move || match weak.upgrade() {
            Some(inner) => inner.on_timer(&id, generation, seq),
            None => false,
        };

        match kind {
            TimerKind::Once => Timer::once(&self.runtime, seq, period, move || {
                fire();
            }),
            TimerKind::Repeating => Timer::repeating(&self.runtime, seq, period, fire),
        }
    }

    /// Timer callback; returns whether a repeating timer should keep ticking
    fn on_timer(self: &Arc<Self>, id: &UpdaterId, generation: u64, seq: u64) -> bool {
        let updaters = self.updaters.lock();
        let armed = updaters.get(id).is_some_and(|entry| {
            entry.is_current(generation) && entry.timer.as_ref().is_some_and(|t| t.seq() == seq)
        });

        if !armed {
            trace!(updater = %id, seq, "timer fenced off");
            return false;
        }

        self.spawn_poll(id.clone(), generation);
        true
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    fn stats(&self) -> EngineStats {
        let updaters = self.updaters.lock();

        let mut updater_stats: Vec<UpdaterStats> = updaters
            .values()
            .map(|entry| UpdaterStats {
                id: entry.id.clone(),
                state: UpdaterState::from_flags(entry.running, entry.failed),
                refresh_timer: entry.config.refresh_timer,
                dynamic_refresh: entry.config.dynamic_refresh,
                poll_count: entry.poll_count,
                consecutive_failures: entry.failures,
            })
            .collect();
        updater_stats.sort_by(|a, b| a.id.cmp(&b.id));

        EngineStats {
            total_updaters: updaters.len(),
            running: updaters.values().filter(|e| e.running).count(),
            failed: updaters.values().filter(|e| e.failed).count(),
            timers_armed: updaters.values().filter(|e| e.timer_armed()).count(),
            updater_stats,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.updaters.get_mut().values_mut() {
            entry.halt();
            if let Some(subscription) = entry.listener.take() {
                self.bus.unsubscribe(subscription);
            }
        }
    }
}

// ============================================================================
// AutoUpdater
// ============================================================================

/// Registry of polling updaters
///
/// Cloning an `AutoUpdater` yields another handle onto the same registry.
/// Updaters stop polling once the last handle is dropped and in-flight polls
/// have settled.
///
/// # Example
///
/// ```rust,ignore
/// let engine = AutoUpdater::new()?;
///
/// let id = engine.register(
///     producer::from_fn(|_| Ok(Some(json!(chrono_like_now())))),
///     Some("clock"),
///     Some(ConfigPatch::new().with_refresh_timer(Duration::from_secs(1))),
/// )?;
///
/// // Later
/// if let Some(record) = engine.get_record(&id) {
///     println!("{:?} {}", record.last_value, record.status_label);
/// }
/// engine.deregister(&id);
/// ```
#[derive(Clone)]
pub struct AutoUpdater {
    inner: Arc<Inner>,
}

impl AutoUpdater {
    /// Create an engine on the current tokio runtime with default settings
    pub fn new() -> RegistryResult<Self> {
        Self::builder().build()
    }

    /// Create a builder for custom configuration
    pub fn builder() -> AutoUpdaterBuilder {
        AutoUpdaterBuilder::default()
    }

    /// Register an updater and, unless `auto_start` is false, start it
    ///
    /// Without an identifier a unique `updater-<uuid>` one is generated. An
    /// identifier that is already registered is replaced; the replaced
    /// updater never polls or changes state again.
    pub fn register(
        &self,
        producer: SharedProducer,
        id: Option<&str>,
        patch: Option<ConfigPatch>,
    ) -> RegistryResult<UpdaterId> {
        self.inner.register(producer, id, patch, false)
    }

    /// Like [`register`](Self::register), but fails instead of replacing
    pub fn register_unique(
        &self,
        producer: SharedProducer,
        id: Option<&str>,
        patch: Option<ConfigPatch>,
    ) -> RegistryResult<UpdaterId> {
        self.inner.register(producer, id, patch, true)
    }

    /// Start polling; `false` if the identifier is unknown
    ///
    /// Starting a running updater does nothing. Starting a failed updater
    /// clears the failed flag and polls again.
    pub fn start(&self, id: impl AsRef<str>) -> bool {
        self.inner.start(id.as_ref())
    }

    /// Request a poll; `false` if the identifier is unknown
    ///
    /// Without `force` this only polls when no timer is armed. With `force`
    /// the armed timer is cancelled and the poll happens right away.
    pub fn update(&self, id: impl AsRef<str>, force: bool) -> bool {
        self.inner.update(id.as_ref(), force)
    }

    /// Stop polling and cancel the timer; `false` if the identifier is unknown
    pub fn stop(&self, id: impl AsRef<str>) -> bool {
        self.inner.stop(id.as_ref())
    }

    /// Stop and publish the configured failure value and label
    pub fn fail(&self, id: impl AsRef<str>) -> bool {
        self.inner.fail(id.as_ref())
    }

    /// Overlay `patch` onto an updater's config, returning the result
    ///
    /// Takes effect from the next scheduling decision; no poll is triggered.
    /// A patch that would make the config invalid is rejected and the
    /// unchanged config is returned.
    pub fn modify_config(&self, id: impl AsRef<str>, patch: ConfigPatch) -> Option<UpdaterConfig> {
        self.inner.modify_config(id.as_ref(), &patch)
    }

    /// Stop and remove an updater; `false` if the identifier is unknown
    pub fn deregister(&self, id: impl AsRef<str>) -> bool {
        self.inner.deregister(id.as_ref())
    }

    /// Snapshot of one updater
    pub fn get_record(&self, id: impl AsRef<str>) -> Option<UpdaterRecord> {
        self.inner.updaters.lock().get(id.as_ref()).map(Entry::snapshot)
    }

    /// Snapshots of every updater, sorted by identifier
    pub fn get_all_records(&self) -> Vec<UpdaterRecord> {
        let mut records: Vec<UpdaterRecord> = self
            .inner
            .updaters
            .lock()
            .values()
            .map(Entry::snapshot)
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Whether an updater is registered under `id`
    pub fn contains(&self, id: impl AsRef<str>) -> bool {
        self.inner.updaters.lock().contains_key(id.as_ref())
    }

    /// Number of registered updaters
    pub fn len(&self) -> usize {
        self.inner.updaters.lock().len()
    }

    /// Whether no updaters are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Defaults applied to future registrations
    pub fn defaults(&self) -> UpdaterConfig {
        self.inner.defaults.read().clone()
    }

    /// Overlay `patch` onto the defaults for future registrations
    pub fn set_defaults(&self, patch: ConfigPatch) -> Result<UpdaterConfig, ConfigError> {
        let mut defaults = self.inner.defaults.write();
        let merged = defaults.merged(&patch);
        merged.validate()?;
        *defaults = merged.clone();
        debug!("engine defaults updated");
        Ok(merged)
    }

    /// Aggregate statistics over every updater
    pub fn stats(&self) -> EngineStats {
        self.inner.stats()
    }

    /// Deregister every updater, returning how many there were
    pub fn shutdown(&self) -> usize {
        let ids: Vec<UpdaterId> = self.inner.updaters.lock().keys().cloned().collect();
        let removed = ids
            .iter()
            .filter(|id| self.inner.deregister(id.as_str()))
            .count();
        info!(removed, "autoupdater shut down");
        removed
    }

    /// Subscribe to the change feed
    ///
    /// Receivers that fall behind by more than the feed capacity observe
    /// `RecvError::Lagged` and continue with newer events.
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    /// The bus broadcast and listen events go through
    pub fn bus(&self) -> Arc<dyn EventBus<Value>> {
        Arc::clone(&self.inner.bus)
    }
}

impl fmt::Debug for AutoUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoUpdater")
            .field("updaters", &self.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AutoUpdaterBuilder
// ============================================================================

/// Builder for AutoUpdater configuration
pub struct AutoUpdaterBuilder {
    runtime: Option<Handle>,
    defaults: UpdaterConfig,
    bus: Option<Arc<dyn EventBus<Value>>>,
    change_capacity: usize,
}

impl Default for AutoUpdaterBuilder {
    fn default() -> Self {
        Self {
            runtime: None,
            defaults: UpdaterConfig::default(),
            bus: None,
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }
}

impl AutoUpdaterBuilder {
    /// Spawn polls and timers onto this runtime instead of the current one
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Defaults that registration patches are overlaid onto
    pub fn defaults(mut self, defaults: UpdaterConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Publish and listen on this bus instead of a private `LocalBus`
    pub fn bus(mut self, bus: Arc<dyn EventBus<Value>>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Capacity of the change feed
    pub fn change_capacity(mut self, capacity: usize) -> Self {
        self.change_capacity = capacity;
        self
    }

    /// Build the AutoUpdater
    pub fn build(self) -> RegistryResult<AutoUpdater> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| RegistryError::NoRuntime(e.to_string()))?,
        };

        self.defaults.validate()?;

        let bus: Arc<dyn EventBus<Value>> = match self.bus {
            Some(bus) => bus,
            None => Arc::new(LocalBus::<Value>::new()),
        };
        let (changes, _) = broadcast::channel(self.change_capacity.max(1));

        let inner = Inner {
            updaters: Mutex::new(HashMap::new()),
            defaults: RwLock::new(self.defaults),
            bus,
            runtime,
            changes,
            next_generation: AtomicU64::new(1),
            next_timer: AtomicU64::new(1),
        };

        debug!(change_capacity = self.change_capacity, "AutoUpdater created");
        Ok(AutoUpdater {
            inner: Arc::new(inner),
        })
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics for one updater
#[derive(Debug, Clone)]
pub struct UpdaterStats {
    pub id: UpdaterId,
    pub state: UpdaterState,
    pub refresh_timer: Option<Duration>,
    pub dynamic_refresh: bool,
    pub poll_count: u64,
    pub consecutive_failures: u32,
}

/// Statistics for the whole engine
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub total_updaters: usize,
    pub running: usize,
    pub failed: usize,
    pub timers_armed: usize,
    pub updater_stats: Vec<UpdaterStats>,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AutoUpdater Stats:")?;
        writeln!(f, "  Updaters: {}", self.total_updaters)?;
        writeln!(f, "  Running: {}", self.running)?;
        writeln!(f, "  Failed: {}", self.failed)?;
        writeln!(f, "  Timers armed: {}", self.timers_armed)?;

        if !self.updater_stats.is_empty() {
            writeln!(f, "  Updater details:")?;
            for stat in &self.updater_stats {
                let refresh = match stat.refresh_timer {
                    Some(period) if stat.dynamic_refresh => format!("every {:?} (dynamic)", period),
                    Some(period) => format!("every {:?} (static)", period),
                    None => "manual".to_string(),
                };
                writeln!(
                    f,
                    "    {}: {} ({}, polls: {}, failures: {})",
                    stat.id, stat.state, refresh, stat.poll_count, stat.consecutive_failures
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer;
    use crate::types::MaxFailures;
    use serde_json::json;

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = AutoUpdater::new();
        assert!(matches!(result, Err(RegistryError::NoRuntime(_))));
    }

    #[test]
    fn test_build_with_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let engine = AutoUpdater::builder()
            .runtime(runtime.handle().clone())
            .build()
            .unwrap();
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_defaults() {
        let result = AutoUpdater::builder()
            .defaults(UpdaterConfig::new().with_refresh_timer(Duration::ZERO))
            .build();
        assert!(matches!(
            result,
            Err(RegistryError::Configuration(ConfigError::ZeroRefreshTimer(_)))
        ));
    }

    #[tokio::test]
    async fn test_register_overlays_defaults() {
        let engine = AutoUpdater::builder()
            .defaults(UpdaterConfig::new().with_failure("n/a", "offline"))
            .build()
            .unwrap();

        let patch = ConfigPatch::new()
            .with_auto_start(false)
            .with_max_failures(MaxFailures::Never);
        let id = engine
            .register(producer::constant(1), Some("quotes"), Some(patch))
            .unwrap();

        let record = engine.get_record(&id).unwrap();
        assert_eq!(record.config.max_failures, MaxFailures::Never);
        assert_eq!(record.config.failure_value, json!("n/a"));
        assert_eq!(record.config.failure_label, "offline");
        assert!(!record.running);
        assert!(record.is_loading());
        assert_eq!(record.state(), UpdaterState::Idle);

        // Defaults are never touched by a registration
        assert_eq!(engine.defaults().max_failures, MaxFailures::After(2));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input() {
        let engine = AutoUpdater::new().unwrap();

        let empty = engine.register(producer::constant(1), Some(""), None);
        assert!(matches!(empty, Err(RegistryError::InvalidId(_))));

        let looping = ConfigPatch::new()
            .with_broadcast_event("tick")
            .with_listen_event("tick");
        let result = engine.register(producer::constant(1), None, Some(looping));
        assert!(matches!(
            result,
            Err(RegistryError::Configuration(ConfigError::EventLoop(_)))
        ));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_register_unique() {
        let engine = AutoUpdater::new().unwrap();
        let manual = || Some(ConfigPatch::new().with_auto_start(false));

        engine
            .register_unique(producer::constant(1), Some("clock"), manual())
            .unwrap();
        let second = engine.register_unique(producer::constant(2), Some("clock"), manual());

        assert!(matches!(second, Err(RegistryError::AlreadyRegistered(id)) if id == "clock"));
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_identifiers() {
        let engine = AutoUpdater::new().unwrap();

        assert!(!engine.start("missing"));
        assert!(!engine.update("missing", true));
        assert!(!engine.stop("missing"));
        assert!(!engine.fail("missing"));
        assert!(!engine.deregister("missing"));
        assert!(engine.modify_config("missing", ConfigPatch::new()).is_none());
        assert!(engine.get_record("missing").is_none());
        assert!(!engine.contains("missing"));
    }

    #[tokio::test]
    async fn test_fail_publishes_failure_pair() {
        let engine = AutoUpdater::new().unwrap();
        let id = engine
            .register(
                producer::constant(1),
                Some("clock"),
                Some(ConfigPatch::new().with_auto_start(false)),
            )
            .unwrap();

        assert!(engine.fail(&id));
        let record = engine.get_record(&id).unwrap();
        assert_eq!(record.last_value, Some(json!("?")));
        assert_eq!(record.status_label, "Could not update.");
        assert_eq!(record.state(), UpdaterState::Failed);
    }

    #[tokio::test]
    async fn test_modify_config_rejects_invalid_patch() {
        let engine = AutoUpdater::new().unwrap();
        let id = engine
            .register(
                producer::constant(1),
                None,
                Some(ConfigPatch::new().with_auto_start(false).with_broadcast_event("done")),
            )
            .unwrap();

        let unchanged = engine
            .modify_config(&id, ConfigPatch::new().with_listen_event("done"))
            .unwrap();
        assert!(unchanged.listen_event.is_none());
        assert_eq!(engine.bus().subscriber_count("done"), 0);
    }

    #[tokio::test]
    async fn test_set_defaults_affects_future_registrations_only() {
        let engine = AutoUpdater::new().unwrap();
        let manual = || Some(ConfigPatch::new().with_auto_start(false));
        let before = engine.register(producer::constant(1), None, manual()).unwrap();

        let defaults = engine
            .set_defaults(ConfigPatch::new().with_failure_label("gone"))
            .unwrap();
        assert_eq!(defaults.failure_label, "gone");

        let after = engine.register(producer::constant(1), None, manual()).unwrap();
        assert_eq!(engine.get_record(&before).unwrap().config.failure_label, "Could not update.");
        assert_eq!(engine.get_record(&after).unwrap().config.failure_label, "gone");

        assert!(engine
            .set_defaults(ConfigPatch::new().with_refresh_timer(Duration::ZERO))
            .is_err());
        assert_eq!(engine.defaults().failure_label, "gone");
    }

    #[tokio::test]
    async fn test_stats_display() {
        let engine = AutoUpdater::new().unwrap();
        engine
            .register(
                producer::constant(1),
                Some("clock"),
                Some(ConfigPatch::new().with_auto_start(false).without_refresh_timer()),
            )
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.total_updaters, 1);
        assert_eq!(stats.running, 0);

        let rendered = stats.to_string();
        assert!(rendered.contains("Updaters: 1"));
        assert!(rendered.contains("clock: idle (manual, polls: 0, failures: 0)"));
    }
}
