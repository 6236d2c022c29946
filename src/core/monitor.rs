use crate::core::detector::{
    CancelFirstVictim, CycleSignature, DeadlockCallback, Dispatcher, RaceCallback, RaceDetector,
    ResolutionPolicy,
};
use crate::core::locks::{LockSnapshot, MonitoredLock};
use crate::core::logger::EventLogger;
use crate::core::registry::{CancelToken, LockRegistry, ThreadRegistry, ThreadSnapshot};
use crate::core::sync::SyncList;
use crate::core::types::{
    AtomicOperation, DeadlockEvent, LockEvent, LockId, LockKind, OperationId, RaceEvent, ThreadId,
    get_current_thread_id,
};
use anyhow::{Context, Result};
use chrono::Utc;
use fxhash::FxHashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Granularity of the tick thread's interruptible sleep
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Monitor configuration
///
/// # Example
///
/// ```rust
/// use lockwarden::MonitorConfig;
/// use std::time::Duration;
///
/// let monitor = MonitorConfig::new()
///     .tick_interval(Duration::from_millis(100))
///     .build()
///     .unwrap();
/// monitor.start();
/// monitor.stop();
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the detection/refresh loop runs
    pub tick_interval: Duration,
    /// Run the deadlock detector each tick
    pub detect_deadlocks: bool,
    /// Run the race detection hook each tick
    pub detect_races: bool,
    /// How long the loop backs off after a tick panics
    pub tick_failure_backoff: Duration,
    /// Bounded wait when joining the tick thread on `stop()`
    pub stop_join_timeout: Duration,
    /// Write instrumentation events to this file as JSON lines
    pub log_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            tick_interval: Duration::from_secs(1),
            detect_deadlocks: true,
            detect_races: false,
            tick_failure_backoff: Duration::from_secs(5),
            stop_join_timeout: Duration::from_secs(2),
            log_path: None,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn detect_deadlocks(mut self, enabled: bool) -> Self {
        self.detect_deadlocks = enabled;
        self
    }

    pub fn detect_races(mut self, enabled: bool) -> Self {
        self.detect_races = enabled;
        self
    }

    pub fn with_log<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Construct a monitor from this configuration
    ///
    /// # Errors
    /// Returns an error if the event log file cannot be opened
    pub fn build(self) -> Result<Arc<Monitor>> {
        Monitor::with_config(self)
    }
}

/// Monotonic counters owned by the monitor
#[derive(Default)]
pub(crate) struct Counters {
    total_locks: AtomicU64,
    total_threads: AtomicU64,
    total_races: AtomicU64,
    total_deadlocks: AtomicU64,
    total_atomic_operations: AtomicU64,
    ticks: AtomicU64,
}

impl Counters {
    pub(crate) fn bump_deadlocks(&self) {
        self.total_deadlocks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn bump_races(&self) {
        self.total_races.fetch_add(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of the monitor's counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorStatistics {
    pub total_locks: u64,
    pub total_threads: u64,
    pub total_races: u64,
    pub total_deadlocks: u64,
    pub total_atomic_operations: u64,
    pub ticks: u64,
}

/// Structured document written by [`Monitor::export_report`]
#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorReport {
    pub timestamp: String,
    pub statistics: MonitorStatistics,
    pub locks: Vec<LockSnapshot>,
    pub threads: Vec<ThreadSnapshot>,
    pub race_conditions: Vec<RaceEvent>,
    pub deadlocks: Vec<DeadlockEvent>,
    pub atomic_operations: Vec<OperationId>,
}

/// The concurrency monitor
///
/// Owns the lock and thread registries, the deadlock/race event logs, and
/// the periodic detection loop. Every component that needs monitoring takes
/// the monitor by `Arc`; there is no global instance, and lifecycle
/// (`start`/`stop`/`cleanup`) belongs to whoever constructed it.
///
/// # Example
///
/// ```rust
/// use lockwarden::{LockKind, Monitor};
///
/// let monitor = Monitor::new();
/// monitor.start();
///
/// let lock = monitor.create_lock("cache", LockKind::Exclusive);
/// assert!(lock.try_acquire());
/// lock.release();
///
/// monitor.stop();
/// ```
pub struct Monitor {
    /// Self-reference handed to locks and the tick thread; never upgraded
    /// into an ownership cycle
    me: Weak<Monitor>,
    config: MonitorConfig,
    pub(crate) locks: LockRegistry,
    pub(crate) threads: ThreadRegistry,
    pub(crate) deadlocks: SyncList<DeadlockEvent>,
    pub(crate) races: SyncList<RaceEvent>,
    atomic_ops: Mutex<Vec<AtomicOperation>>,
    pub(crate) counters: Counters,
    pub(crate) logger: EventLogger,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) resolution: Mutex<Box<dyn ResolutionPolicy>>,
    pub(crate) race_detector: Mutex<Option<Box<dyn RaceDetector>>>,
    /// Cycle signatures confirmed on the previous tick; a persisting cycle
    /// is reported once, not once per tick
    pub(crate) seen_cycles: Mutex<FxHashSet<CycleSignature>>,
    deadlock_callbacks: Arc<Mutex<Vec<DeadlockCallback>>>,
    race_callbacks: Arc<Mutex<Vec<RaceCallback>>>,
    running: AtomicBool,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
    next_event_id: AtomicUsize,
    next_operation_id: AtomicUsize,
}

impl Monitor {
    /// Create a monitor with default settings and no event log
    pub fn new() -> Arc<Self> {
        Self::assemble(MonitorConfig::default(), EventLogger::new())
    }

    /// Create a monitor from an explicit configuration
    ///
    /// # Errors
    /// Returns an error if the configured event log file cannot be opened
    pub fn with_config(config: MonitorConfig) -> Result<Arc<Self>> {
        let logger = match &config.log_path {
            Some(path) => {
                EventLogger::with_file(path).context("Failed to initialize event logger")?
            }
            None => EventLogger::new(),
        };
        Ok(Self::assemble(config, logger))
    }

    fn assemble(config: MonitorConfig, logger: EventLogger) -> Arc<Self> {
        let deadlock_callbacks: Arc<Mutex<Vec<DeadlockCallback>>> =
            Arc::new(Mutex::new(Vec::new()));
        let race_callbacks: Arc<Mutex<Vec<RaceCallback>>> = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&deadlock_callbacks),
            Arc::clone(&race_callbacks),
        );

        Arc::new_cyclic(|me| Monitor {
            me: me.clone(),
            config,
            locks: LockRegistry::new(),
            threads: ThreadRegistry::new(),
            deadlocks: SyncList::new(),
            races: SyncList::new(),
            atomic_ops: Mutex::new(Vec::new()),
            counters: Counters::default(),
            logger,
            dispatcher,
            resolution: Mutex::new(Box::new(CancelFirstVictim)),
            race_detector: Mutex::new(None),
            seen_cycles: Mutex::new(FxHashSet::default()),
            deadlock_callbacks,
            race_callbacks,
            running: AtomicBool::new(false),
            tick_thread: Mutex::new(None),
            next_event_id: AtomicUsize::new(1),
            next_operation_id: AtomicUsize::new(1),
        })
    }

    // ---- lifecycle ----

    /// Start the periodic detection loop
    ///
    /// Idempotent: calling `start` on a running monitor does nothing.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        // The tick thread holds only a weak handle so dropping the last
        // user Arc still tears the monitor down
        let weak = self.me.clone();
        let interval = self.config.tick_interval;
        let backoff = self.config.tick_failure_backoff;

        let spawned = thread::Builder::new()
            .name("lockwarden-monitor".into())
            .spawn(move || {
                loop {
                    let sleep_for = match weak.upgrade() {
                        Some(monitor) => {
                            if !monitor.running.load(Ordering::SeqCst) {
                                break;
                            }
                            let started = Instant::now();
                            let outcome = catch_unwind(AssertUnwindSafe(|| monitor.run_tick()));
                            monitor.counters.ticks.fetch_add(1, Ordering::SeqCst);
                            match outcome {
                                Ok(()) => interval.saturating_sub(started.elapsed()),
                                Err(_) => {
                                    eprintln!(
                                        "lockwarden: monitor tick panicked; backing off for {backoff:?}"
                                    );
                                    monitor.logger.log_warning("monitor tick panicked");
                                    backoff
                                }
                            }
                        }
                        None => break,
                    };

                    // Sleep in slices so stop() is observed promptly
                    let deadline = Instant::now() + sleep_for;
                    loop {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        let stopped = weak
                            .upgrade()
                            .is_none_or(|m| !m.running.load(Ordering::SeqCst));
                        if stopped {
                            return;
                        }
                        thread::sleep(SLEEP_SLICE.min(deadline - now));
                    }
                }
            });

        match spawned {
            Ok(handle) => *self.tick_thread.lock() = Some(handle),
            Err(e) => {
                eprintln!("lockwarden: failed to spawn monitor thread: {e}");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// One pass of the periodic loop: deadlock scan, race hook, thread refresh
    fn run_tick(&self) {
        if self.config.detect_deadlocks {
            self.run_deadlock_detection();
        }
        if self.config.detect_races {
            self.run_race_detection();
        }
        self.threads.refresh();
    }

    /// Stop the detection loop, joining the tick thread with a bounded wait
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.tick_thread.lock().take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + self.config.stop_join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(SLEEP_SLICE);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                eprintln!("lockwarden: monitor thread did not stop within the join timeout");
            }
        }
    }

    /// Stop the loop and clear every registry and event log
    pub fn cleanup(&self) {
        self.stop();
        self.locks.reset();
        self.threads.reset();
        self.deadlocks.clear();
        self.races.clear();
        self.atomic_ops.lock().clear();
        self.seen_cycles.lock().clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of completed ticks since construction
    pub fn tick_count(&self) -> u64 {
        self.counters.ticks.load(Ordering::SeqCst)
    }

    // ---- locks ----

    /// Create and register a new monitored lock
    pub fn create_lock(&self, name: impl Into<String>, kind: LockKind) -> Arc<MonitoredLock> {
        let lock = Arc::new(MonitoredLock::new(name, kind, self.me.clone()));
        self.locks.register(Arc::clone(&lock));
        self.counters.total_locks.fetch_add(1, Ordering::SeqCst);
        self.observe_thread(get_current_thread_id());
        self.logger
            .log_interaction(get_current_thread_id(), lock.id(), LockEvent::Created);
        lock
    }

    /// Look up a registered lock by id
    pub fn lock_by_id(&self, lock_id: LockId) -> Option<Arc<MonitoredLock>> {
        self.locks.get(lock_id)
    }

    /// Look up a registered lock by display name
    pub fn lock_by_name(&self, name: &str) -> Option<Arc<MonitoredLock>> {
        self.locks.get_by_name(name)
    }

    /// Remove a lock record from the registry
    ///
    /// Outstanding handles keep the lock itself usable; only its record and
    /// name mapping go away.
    pub fn destroy_lock(&self, lock_id: LockId) {
        if self.locks.remove(lock_id).is_some() {
            self.logger
                .log_interaction(get_current_thread_id(), lock_id, LockEvent::Destroyed);
        }
    }

    /// Fetch or create the reentrant lock guarding a named atomic-section
    /// resource
    pub(crate) fn atomic_resource_lock(&self, name: impl Into<String>) -> Arc<MonitoredLock> {
        let name = name.into();
        let weak = self.me.clone();
        let (lock, created) = self
            .locks
            .get_or_register_with(&name, || {
                Arc::new(MonitoredLock::new(name.clone(), LockKind::Reentrant, weak))
            });
        if created {
            self.counters.total_locks.fetch_add(1, Ordering::SeqCst);
            self.logger
                .log_interaction(get_current_thread_id(), lock.id(), LockEvent::Created);
        }
        lock
    }

    // ---- recording methods (the only mutators of registry state) ----

    pub(crate) fn record_lock_attempt(&self, thread_id: ThreadId, lock_id: LockId) {
        self.observe_thread(thread_id);
        self.logger
            .log_interaction(thread_id, lock_id, LockEvent::Attempt);
    }

    pub(crate) fn record_lock_wait(&self, thread_id: ThreadId, lock_id: LockId) {
        self.threads.record_wait(thread_id, lock_id);
    }

    pub(crate) fn record_lock_acquisition(&self, thread_id: ThreadId, lock_id: LockId) {
        self.threads.record_held(thread_id, lock_id);
        self.logger
            .log_interaction(thread_id, lock_id, LockEvent::Acquired);
    }

    pub(crate) fn record_lock_abandoned(&self, thread_id: ThreadId, lock_id: LockId) {
        self.threads.clear_wait(thread_id, lock_id);
        self.logger
            .log_interaction(thread_id, lock_id, LockEvent::Abandoned);
    }

    pub(crate) fn record_lock_release(&self, thread_id: ThreadId, lock_id: LockId) {
        self.threads.clear_held(thread_id, lock_id);
        self.logger
            .log_interaction(thread_id, lock_id, LockEvent::Released);
    }

    /// A nested reentrant release: depth decreased, lock still held
    pub(crate) fn record_reentrant_release(&self, thread_id: ThreadId, lock_id: LockId) {
        self.logger
            .log_interaction(thread_id, lock_id, LockEvent::Released);
    }

    pub(crate) fn warn_release_not_held(&self, thread_id: ThreadId, lock_id: LockId, name: &str) {
        eprintln!(
            "lockwarden: thread {thread_id} released lock '{name}' (id {lock_id}) it does not hold"
        );
        self.logger.log_warning(format!(
            "thread {thread_id} released lock '{name}' (id {lock_id}) it does not hold"
        ));
    }

    // ---- threads ----

    /// Ensure a thread is registered, counting it once
    pub fn observe_thread(&self, thread_id: ThreadId) {
        if self.threads.observe(thread_id, None) {
            self.counters.total_threads.fetch_add(1, Ordering::SeqCst);
            self.logger.log_thread(thread_id, LockEvent::Created);
        }
    }

    pub(crate) fn record_thread_start(
        &self,
        thread_id: ThreadId,
        name: &str,
        alive: Arc<AtomicBool>,
    ) {
        if self.threads.observe(thread_id, Some(name)) {
            self.counters.total_threads.fetch_add(1, Ordering::SeqCst);
        }
        self.threads.register_liveness(thread_id, alive);
        self.logger.log_thread(thread_id, LockEvent::Created);
    }

    pub(crate) fn record_thread_exit(&self, thread_id: ThreadId) {
        self.threads.mark_terminated(thread_id);
        self.logger.log_thread(thread_id, LockEvent::Destroyed);
    }

    /// A worker went idle between units of work
    pub(crate) fn record_worker_idle(&self, thread_id: ThreadId) {
        self.threads.mark_waiting(thread_id);
    }

    /// A worker claimed a task after idling
    pub(crate) fn record_worker_busy(&self, thread_id: ThreadId) {
        self.threads.mark_running(thread_id);
    }

    /// Register a fresh cancellation token for a thread
    ///
    /// The default resolution policy trips this token when the thread is
    /// chosen as a deadlock victim; the thread polls it cooperatively.
    pub fn register_cancel_token(&self, thread_id: ThreadId) -> CancelToken {
        self.observe_thread(thread_id);
        let token = CancelToken::new();
        self.threads.register_cancel_token(thread_id, token.clone());
        token
    }

    /// Fetch the cancellation token registered for a thread, if any
    pub fn cancel_token_of(&self, thread_id: ThreadId) -> Option<CancelToken> {
        self.threads.cancel_token(thread_id)
    }

    /// Attach a captured call-stack snapshot to a thread record
    pub fn record_thread_stack(&self, thread_id: ThreadId, stack: String) {
        self.observe_thread(thread_id);
        self.threads.record_stack(thread_id, stack);
    }

    // ---- extension points ----

    /// Register a callback invoked (off the tick loop) for every deadlock
    pub fn add_deadlock_callback<F>(&self, callback: F)
    where
        F: Fn(&DeadlockEvent) + Send + Sync + 'static,
    {
        self.deadlock_callbacks.lock().push(Arc::new(callback));
    }

    /// Register a callback invoked for every race event
    pub fn add_race_callback<F>(&self, callback: F)
    where
        F: Fn(&RaceEvent) + Send + Sync + 'static,
    {
        self.race_callbacks.lock().push(Arc::new(callback));
    }

    /// Replace the deadlock resolution policy
    pub fn set_resolution_policy<P: ResolutionPolicy + 'static>(&self, policy: P) {
        *self.resolution.lock() = Box::new(policy);
    }

    /// Install a race detector; scanned once per tick when race detection
    /// is enabled
    pub fn set_race_detector<D: RaceDetector + 'static>(&self, detector: D) {
        *self.race_detector.lock() = Some(Box::new(detector));
    }

    // ---- atomic operations ----

    pub(crate) fn next_operation_id(&self) -> OperationId {
        self.next_operation_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn record_atomic_operation(&self, operation: AtomicOperation) {
        self.counters
            .total_atomic_operations
            .fetch_add(1, Ordering::SeqCst);
        self.atomic_ops.lock().push(operation);
    }

    pub(crate) fn complete_atomic_operation(&self, operation_id: OperationId) {
        let mut ops = self.atomic_ops.lock();
        if let Some(op) = ops.iter_mut().find(|op| op.id == operation_id) {
            op.completed = true;
        }
    }

    pub(crate) fn next_event_id(&self) -> usize {
        self.next_event_id.fetch_add(1, Ordering::SeqCst)
    }

    // ---- introspection & export ----

    pub fn statistics(&self) -> MonitorStatistics {
        MonitorStatistics {
            total_locks: self.counters.total_locks.load(Ordering::SeqCst),
            total_threads: self.counters.total_threads.load(Ordering::SeqCst),
            total_races: self.counters.total_races.load(Ordering::SeqCst),
            total_deadlocks: self.counters.total_deadlocks.load(Ordering::SeqCst),
            total_atomic_operations: self
                .counters
                .total_atomic_operations
                .load(Ordering::SeqCst),
            ticks: self.counters.ticks.load(Ordering::SeqCst),
        }
    }

    /// Deadlock events recorded so far
    pub fn deadlock_events(&self) -> Vec<DeadlockEvent> {
        self.deadlocks.snapshot()
    }

    /// Race events recorded so far
    pub fn race_events(&self) -> Vec<RaceEvent> {
        self.races.snapshot()
    }

    /// Atomic operations recorded so far
    pub fn atomic_operations(&self) -> Vec<AtomicOperation> {
        self.atomic_ops.lock().clone()
    }

    /// Assemble the full diagnostic document
    pub fn build_report(&self) -> MonitorReport {
        MonitorReport {
            timestamp: Utc::now().to_rfc3339(),
            statistics: self.statistics(),
            locks: self.locks.snapshot_all(),
            threads: self.threads.snapshot_all(),
            race_conditions: self.races.snapshot(),
            deadlocks: self.deadlocks.snapshot(),
            atomic_operations: self.atomic_ops.lock().iter().map(|op| op.id).collect(),
        }
    }

    /// Serialize the diagnostic report to a file as pretty JSON
    ///
    /// # Errors
    /// Failure to serialize or write is logged and returned; it never panics
    pub fn export_report<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let report = self.build_report();
        let result = serde_json::to_string_pretty(&report)
            .context("Failed to serialize monitor report")
            .and_then(|json| {
                std::fs::write(path.as_ref(), json).context("Failed to write monitor report")
            });
        if let Err(e) = &result {
            eprintln!("lockwarden: report export failed: {e:#}");
            self.logger.log_warning(format!("report export failed: {e:#}"));
        }
        result
    }
}
