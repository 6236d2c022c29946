//! # Lockwarden
//!
//! A runtime concurrency-safety layer: instrumented locks, a live thread
//! registry, and real-time deadlock detection over a wait-for graph.
//!
//! Lockwarden wraps primitive synchronization objects with instrumentation
//! so that lock acquisition/release, thread liveness, and cross-thread
//! waiting relationships are observable, then uses that observability to
//! detect deadlocks and resolve them cooperatively.
//!
//! ## Features
//!
//! - Named, typed locks (exclusive, reentrant, read-write, spin) that report
//!   every acquisition and release to a monitor
//! - Periodic wait-for-graph deadlock detection with confirmation against
//!   live state and cooperative cancellation of the chosen victim
//! - Atomic multi-resource sections with guaranteed release on every exit
//!   path
//! - A monitored worker pool exercising the same instrumentation
//! - JSON diagnostic reports and JSON-lines event logging
//!
//! ## Quick start
//!
//! ```rust
//! use lockwarden::{LockKind, MonitorConfig};
//! use std::time::Duration;
//!
//! let monitor = MonitorConfig::new()
//!     .tick_interval(Duration::from_millis(100))
//!     .build()
//!     .unwrap();
//!
//! monitor.add_deadlock_callback(|event| {
//!     eprintln!("deadlock between threads {:?}", event.thread_cycle);
//! });
//! monitor.start();
//!
//! let lock = monitor.create_lock("shared-state", LockKind::Exclusive);
//! assert!(lock.try_acquire());
//! lock.release();
//!
//! monitor.stop();
//! ```

mod core;

pub use core::{
    ATOMIC_LOCK_PREFIX, AtomicOperation, AtomicSection, CancelFirstVictim, CancelToken,
    DeadlockEvent, EventLogger, GraphSnapshot, LockEvent, LockGuard, LockId, LockKind,
    LockSnapshot, Monitor, MonitorConfig, MonitorReport, MonitorStatistics, MonitoredLock,
    MonitoredThread, NoopRaceDetector, OperationId, PoolStatistics, RaceDetector, RaceEvent,
    Resolution, ResolutionPolicy, TaskId, TaskState, TaskStatus, ThreadId, ThreadSnapshot,
    ThreadState, WaitNode, WorkerPool, get_current_thread_id,
    sync::{SyncCounter, SyncList, SyncMap},
};
