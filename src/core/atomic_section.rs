//! Atomic multi-resource sections
//!
//! An atomic section acquires one reentrant lock per named resource, runs
//! the protected work with all of them held, and releases every acquired
//! lock on every exit path, panic included.
//!
//! Locks are acquired in the order the resources were given; the order is
//! NOT canonicalized. Two sections requesting the same resources in
//! different orders can deadlock each other, so callers must agree on one
//! global resource order, or run under a started monitor and rely on the
//! deadlock detector to catch the cycle.

use crate::core::locks::MonitoredLock;
use crate::core::monitor::Monitor;
use crate::core::types::{AtomicOperation, get_current_thread_id};
use anyhow::{Result, bail};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Name prefix for the per-resource locks the section protocol creates
pub const ATOMIC_LOCK_PREFIX: &str = "atomic::";

/// Pause between acquisition rounds when a retry budget is configured
const RETRY_BACKOFF: Duration = Duration::from_millis(5);

/// Scoped acquisition of a fixed set of named resource locks
///
/// # Example
///
/// ```rust
/// use lockwarden::{AtomicSection, Monitor};
///
/// let monitor = Monitor::new();
/// let section = AtomicSection::new(&monitor, ["accounts", "ledger"]);
/// let total = section.run(|| 40 + 2).unwrap();
/// assert_eq!(total, 42);
/// ```
pub struct AtomicSection {
    monitor: Arc<Monitor>,
    /// Resource names in acquisition order
    resources: Vec<String>,
    timeout: Option<Duration>,
    retries: u32,
}

impl AtomicSection {
    /// Create a section over the given resources
    ///
    /// Resources are acquired in iteration order. Duplicate names are fine:
    /// the underlying locks are reentrant.
    pub fn new<I, S>(monitor: &Arc<Monitor>, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AtomicSection {
            monitor: Arc::clone(monitor),
            resources: resources.into_iter().map(Into::into).collect(),
            timeout: None,
            retries: 0,
        }
    }

    /// Bound the time spent acquiring the full resource set per attempt
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Allow this many extra acquisition rounds before giving up
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Acquire every resource lock, run the work, release everything
    ///
    /// The protected work runs only once all locks are held. Held locks are
    /// released on every exit path: normal return, acquisition failure of a
    /// later lock, or a panic inside the work (which propagates after
    /// release).
    ///
    /// # Errors
    /// Fails if the resource set cannot be fully acquired within the
    /// configured timeout and retry budget.
    pub fn run<T>(&self, work: impl FnOnce() -> T) -> Result<T> {
        let locks: Vec<Arc<MonitoredLock>> = self
            .resources
            .iter()
            .map(|resource| {
                self.monitor
                    .atomic_resource_lock(format!("{ATOMIC_LOCK_PREFIX}{resource}"))
            })
            .collect();

        let mut attempt = 0;
        let held = loop {
            match Self::acquire_all(&locks, self.timeout) {
                Some(held) => break held,
                None => {
                    if attempt >= self.retries {
                        bail!(
                            "atomic section could not acquire resources {:?} (timeout {:?}, {} attempts)",
                            self.resources,
                            self.timeout,
                            attempt + 1
                        );
                    }
                    attempt += 1;
                    thread::sleep(RETRY_BACKOFF);
                }
            }
        };

        let operation_id = self.monitor.next_operation_id();
        self.monitor.record_atomic_operation(AtomicOperation {
            id: operation_id,
            thread_id: get_current_thread_id(),
            resources: self.resources.clone(),
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            retries: self.retries,
            completed: false,
        });

        // `held` guards drop on unwind, releasing every lock
        let output = work();

        self.monitor.complete_atomic_operation(operation_id);
        drop(held);
        Ok(output)
    }

    /// Acquire all locks in order, or none
    ///
    /// A failure part-way drops the guards collected so far, releasing the
    /// partial set before the retry backoff.
    fn acquire_all(
        locks: &[Arc<MonitoredLock>],
        timeout: Option<Duration>,
    ) -> Option<Vec<HeldResource>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut held = Vec::with_capacity(locks.len());
        for lock in locks {
            let acquired = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    !remaining.is_zero() && lock.acquire_timeout(remaining)
                }
                None => lock.acquire(),
            };
            if !acquired {
                return None;
            }
            held.push(HeldResource(Arc::clone(lock)));
        }
        Some(held)
    }
}

/// Releases its resource lock when dropped
struct HeldResource(Arc<MonitoredLock>);

impl Drop for HeldResource {
    fn drop(&mut self) {
        self.0.release();
    }
}
