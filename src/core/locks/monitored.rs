use crate::core::locks::NEXT_LOCK_ID;
use crate::core::monitor::Monitor;
use crate::core::types::{LockId, LockKind, ThreadId, get_current_thread_id};
use chrono::{DateTime, Utc};
use fxhash::FxHashSet;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::{Duration, Instant};

/// How many spin iterations a spin lock performs between yields
const SPIN_BURST: u32 = 64;

/// Exported view of one lock at a point in time
///
/// Snapshots are what the deadlock detector analyzes: the live lock keeps
/// mutating, so every detection pass copies `(owner, waiters)` out first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub id: LockId,
    pub name: String,
    pub kind: LockKind,
    pub owner: Option<ThreadId>,
    pub readers: Vec<ThreadId>,
    pub waiters: Vec<ThreadId>,
    pub acquisitions: u64,
    pub total_wait_ms: u64,
    pub created_at: String,
}

/// Mutable acquisition state, guarded by the lock's internal mutex
struct LockState {
    /// Current exclusive holder; readers are tracked separately
    owner: Option<ThreadId>,
    /// Nesting depth for the reentrant kind; 1 for a plain hold
    recursion: u32,
    /// Shared holders (read-write kind only)
    readers: FxHashSet<ThreadId>,
    /// Threads currently blocked trying to acquire, in arrival order.
    /// This queue is the detector's only source of wait-state; a thread id
    /// appears here exactly while it is blocked on this lock.
    waiters: Vec<ThreadId>,
    acquisitions: u64,
    total_wait: Duration,
}

/// A named, typed lock that reports acquisition and release to a [`Monitor`]
///
/// MonitoredLock provides explicit `acquire`/`release` mutual exclusion over
/// a named resource, in four kinds: exclusive, reentrant-exclusive,
/// read-write, and spin. Every acquisition attempt, success, release, and
/// abandonment is reported to the owning monitor, which keeps the thread
/// registry current; the lock's own waiter queue feeds the wait-for graph.
///
/// Locks are created through [`Monitor::create_lock`] and hold only a weak
/// back-reference to the monitor, never ownership.
///
/// # Example
///
/// ```rust
/// use lockwarden::{LockKind, Monitor};
///
/// let monitor = Monitor::new();
/// let lock = monitor.create_lock("shared-state", LockKind::Exclusive);
///
/// assert!(lock.try_acquire());
/// assert!(lock.is_held_by_current());
/// lock.release();
/// ```
pub struct MonitoredLock {
    /// Unique identifier for this lock
    id: LockId,
    /// Display name
    name: String,
    /// Kind, fixed at creation
    kind: LockKind,
    /// Back-reference for reporting; the monitor owns the registries
    monitor: Weak<Monitor>,
    state: Mutex<LockState>,
    /// Waiters park here; woken on every release (no FIFO guarantee)
    available: Condvar,
    created_at: DateTime<Utc>,
}

impl MonitoredLock {
    /// Create a new lock with an automatically assigned ID
    ///
    /// Called by [`Monitor::create_lock`], which registers the lock.
    pub(crate) fn new(name: impl Into<String>, kind: LockKind, monitor: Weak<Monitor>) -> Self {
        MonitoredLock {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::SeqCst),
            name: name.into(),
            kind,
            monitor,
            state: Mutex::new(LockState {
                owner: None,
                recursion: 0,
                readers: FxHashSet::default(),
                waiters: Vec::new(),
                acquisitions: 0,
                total_wait: Duration::ZERO,
            }),
            available: Condvar::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Attempt to acquire without blocking
    ///
    /// # Returns
    /// `true` if the lock was taken. The reentrant kind returns `true` when
    /// the caller already holds the lock, incrementing its nesting depth.
    pub fn try_acquire(&self) -> bool {
        self.acquire_inner(None, false)
    }

    /// Acquire, blocking indefinitely
    ///
    /// A non-reentrant lock re-acquired by its own holder blocks like any
    /// second thread would. The detector cannot confirm a one-thread cycle,
    /// so treat self-reacquisition as a caller bug, not something the monitor
    /// will rescue.
    pub fn acquire(&self) -> bool {
        self.acquire_inner(None, true)
    }

    /// Acquire, blocking up to `timeout`
    ///
    /// # Returns
    /// `true` if the lock was taken before the timeout elapsed
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.acquire_inner(Some(timeout), true)
    }

    /// Release the lock
    ///
    /// Clears the holder (or decrements the reentrant nesting depth) and
    /// wakes waiters. Releasing a lock the calling thread does not hold is
    /// a logged no-op, not an error.
    pub fn release(&self) {
        let thread_id = get_current_thread_id();
        let mut state = self.state.lock();

        if state.owner != Some(thread_id) {
            drop(state);
            self.report(|m| m.warn_release_not_held(thread_id, self.id, &self.name));
            return;
        }

        if self.kind == LockKind::Reentrant && state.recursion > 1 {
            state.recursion -= 1;
            drop(state);
            self.report(|m| m.record_reentrant_release(thread_id, self.id));
            return;
        }

        state.owner = None;
        state.recursion = 0;
        self.available.notify_all();
        drop(state);
        self.report(|m| m.record_lock_release(thread_id, self.id));
    }

    /// Attempt to acquire shared (read) access without blocking
    ///
    /// Only meaningful for the read-write kind; other kinds treat shared
    /// acquisition as exclusive.
    pub fn try_acquire_shared(&self) -> bool {
        if self.kind != LockKind::ReadWrite {
            return self.try_acquire();
        }
        self.acquire_shared_inner(None, false)
    }

    /// Acquire shared (read) access, blocking indefinitely
    pub fn acquire_shared(&self) -> bool {
        if self.kind != LockKind::ReadWrite {
            return self.acquire();
        }
        self.acquire_shared_inner(None, true)
    }

    /// Acquire shared (read) access, blocking up to `timeout`
    pub fn acquire_shared_timeout(&self, timeout: Duration) -> bool {
        if self.kind != LockKind::ReadWrite {
            return self.acquire_timeout(timeout);
        }
        self.acquire_shared_inner(Some(timeout), true)
    }

    /// Release shared (read) access
    pub fn release_shared(&self) {
        if self.kind != LockKind::ReadWrite {
            self.release();
            return;
        }
        let thread_id = get_current_thread_id();
        let mut state = self.state.lock();
        if !state.readers.remove(&thread_id) {
            drop(state);
            self.report(|m| m.warn_release_not_held(thread_id, self.id, &self.name));
            return;
        }
        self.available.notify_all();
        drop(state);
        self.report(|m| m.record_lock_release(thread_id, self.id));
    }

    /// Whether any thread currently holds the lock, exclusively or shared
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.owner.is_some() || !state.readers.is_empty()
    }

    /// Whether the calling thread is the exclusive holder
    pub fn is_held_by_current(&self) -> bool {
        self.state.lock().owner == Some(get_current_thread_id())
    }

    /// Current exclusive holder, if any
    pub fn holder(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    /// Threads currently blocked on this lock, in arrival order
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.state.lock().waiters.clone()
    }

    /// Acquire and return a guard that releases on drop
    pub fn lock(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }

    /// Try to acquire, returning a releasing guard on success
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        self.try_acquire().then_some(LockGuard { lock: self })
    }

    /// Acquire with a timeout, returning a releasing guard on success
    pub fn lock_timeout(&self, timeout: Duration) -> Option<LockGuard<'_>> {
        self.acquire_timeout(timeout)
            .then_some(LockGuard { lock: self })
    }

    /// Copy out the lock's current state for detection or export
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        let mut readers: Vec<ThreadId> = state.readers.iter().copied().collect();
        readers.sort_unstable();
        LockSnapshot {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            owner: state.owner,
            readers,
            waiters: state.waiters.clone(),
            acquisitions: state.acquisitions,
            total_wait_ms: state.total_wait.as_millis() as u64,
            created_at: self.created_at.to_rfc3339(),
        }
    }

    fn acquire_inner(&self, timeout: Option<Duration>, block: bool) -> bool {
        let thread_id = get_current_thread_id();
        self.report(|m| m.record_lock_attempt(thread_id, self.id));
        let started = Instant::now();

        // Fast path: grant or fail without registering as a waiter
        {
            let mut state = self.state.lock();
            if self.can_grant(&state, thread_id) {
                self.grant(&mut state, thread_id);
                drop(state);
                self.report(|m| m.record_lock_acquisition(thread_id, self.id));
                return true;
            }
            if !block {
                drop(state);
                self.report(|m| m.record_lock_abandoned(thread_id, self.id));
                return false;
            }
        }

        // Slow path: register the wait with the monitor, then park or spin
        self.report(|m| m.record_lock_wait(thread_id, self.id));
        let deadline = timeout.map(|t| started + t);
        let acquired = match self.kind {
            LockKind::Spin => self.wait_spinning(thread_id, deadline),
            _ => self.wait_parked(thread_id, deadline),
        };

        if acquired {
            self.add_wait_time(started.elapsed());
            self.report(|m| m.record_lock_acquisition(thread_id, self.id));
        } else {
            self.report(|m| m.record_lock_abandoned(thread_id, self.id));
        }
        acquired
    }

    fn add_wait_time(&self, waited: Duration) {
        self.state.lock().total_wait += waited;
    }

    fn acquire_shared_inner(&self, timeout: Option<Duration>, block: bool) -> bool {
        let thread_id = get_current_thread_id();
        self.report(|m| m.record_lock_attempt(thread_id, self.id));
        let started = Instant::now();

        {
            let mut state = self.state.lock();
            if state.owner.is_none() {
                Self::grant_shared(&mut state, thread_id);
                drop(state);
                self.report(|m| m.record_lock_acquisition(thread_id, self.id));
                return true;
            }
            if !block {
                drop(state);
                self.report(|m| m.record_lock_abandoned(thread_id, self.id));
                return false;
            }
        }

        self.report(|m| m.record_lock_wait(thread_id, self.id));
        let deadline = timeout.map(|t| started + t);

        let mut state = self.state.lock();
        state.waiters.push(thread_id);
        let acquired = loop {
            if state.owner.is_none() {
                Self::remove_waiter(&mut state, thread_id);
                Self::grant_shared(&mut state, thread_id);
                break true;
            }
            match deadline {
                Some(d) => {
                    if self.available.wait_until(&mut state, d).timed_out() {
                        if state.owner.is_none() {
                            Self::remove_waiter(&mut state, thread_id);
                            Self::grant_shared(&mut state, thread_id);
                            break true;
                        }
                        Self::remove_waiter(&mut state, thread_id);
                        break false;
                    }
                }
                None => self.available.wait(&mut state),
            }
        };
        drop(state);

        if acquired {
            self.add_wait_time(started.elapsed());
            self.report(|m| m.record_lock_acquisition(thread_id, self.id));
        } else {
            self.report(|m| m.record_lock_abandoned(thread_id, self.id));
        }
        acquired
    }

    /// Park on the condvar until grantable or the deadline passes
    fn wait_parked(&self, thread_id: ThreadId, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        state.waiters.push(thread_id);
        loop {
            if self.can_grant(&state, thread_id) {
                Self::remove_waiter(&mut state, thread_id);
                self.grant(&mut state, thread_id);
                return true;
            }
            match deadline {
                Some(d) => {
                    if self.available.wait_until(&mut state, d).timed_out() {
                        // One last look before giving up
                        if self.can_grant(&state, thread_id) {
                            Self::remove_waiter(&mut state, thread_id);
                            self.grant(&mut state, thread_id);
                            return true;
                        }
                        Self::remove_waiter(&mut state, thread_id);
                        return false;
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Busy-wait with periodic yields instead of parking
    fn wait_spinning(&self, thread_id: ThreadId, deadline: Option<Instant>) -> bool {
        {
            let mut state = self.state.lock();
            state.waiters.push(thread_id);
        }
        loop {
            {
                let mut state = self.state.lock();
                if self.can_grant(&state, thread_id) {
                    Self::remove_waiter(&mut state, thread_id);
                    self.grant(&mut state, thread_id);
                    return true;
                }
                if let Some(d) = deadline
                    && Instant::now() >= d
                {
                    Self::remove_waiter(&mut state, thread_id);
                    return false;
                }
            }
            for _ in 0..SPIN_BURST {
                std::hint::spin_loop();
            }
            std::thread::yield_now();
        }
    }

    fn can_grant(&self, state: &LockState, thread_id: ThreadId) -> bool {
        match self.kind {
            LockKind::Exclusive | LockKind::Spin => state.owner.is_none(),
            LockKind::Reentrant => state.owner.is_none() || state.owner == Some(thread_id),
            LockKind::ReadWrite => state.owner.is_none() && state.readers.is_empty(),
        }
    }

    fn grant(&self, state: &mut LockState, thread_id: ThreadId) {
        if self.kind == LockKind::Reentrant && state.owner == Some(thread_id) {
            state.recursion += 1;
        } else {
            state.owner = Some(thread_id);
            state.recursion = 1;
        }
        state.acquisitions += 1;
    }

    fn grant_shared(state: &mut LockState, thread_id: ThreadId) {
        state.readers.insert(thread_id);
        state.acquisitions += 1;
    }

    fn remove_waiter(state: &mut LockState, thread_id: ThreadId) {
        if let Some(pos) = state.waiters.iter().position(|&t| t == thread_id) {
            state.waiters.remove(pos);
        }
    }

    /// Run a monitor callback if the monitor is still alive
    fn report<F: FnOnce(&Monitor)>(&self, f: F) {
        if let Some(monitor) = self.monitor.upgrade() {
            f(&monitor);
        }
    }
}

/// Guard that releases its lock when dropped
///
/// Used wherever release on every exit path matters, e.g. the atomic
/// section protocol keeps one guard per acquired resource so a panic in the
/// protected work still releases everything.
pub struct LockGuard<'a> {
    lock: &'a MonitoredLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn bare_lock(kind: LockKind) -> Arc<MonitoredLock> {
        Arc::new(MonitoredLock::new("test", kind, Weak::new()))
    }

    #[test]
    fn test_exclusive_try_acquire_release() {
        let lock = bare_lock(LockKind::Exclusive);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire());
        assert!(lock.is_locked());
        assert!(lock.is_held_by_current());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_reentrant_nesting_depth() {
        let lock = bare_lock(LockKind::Reentrant);
        assert!(lock.try_acquire());
        assert!(lock.try_acquire());
        assert!(lock.try_acquire());

        lock.release();
        lock.release();
        assert!(lock.is_held_by_current());
        lock.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_release_not_held_is_noop() {
        let lock = bare_lock(LockKind::Exclusive);
        // Nothing held; must not panic or corrupt state
        lock.release();
        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    fn test_acquire_timeout_expires_under_contention() {
        let lock = bare_lock(LockKind::Exclusive);
        assert!(lock.try_acquire());

        let contender = Arc::clone(&lock);
        let handle = thread::spawn(move || contender.acquire_timeout(Duration::from_millis(50)));
        assert!(!handle.join().unwrap());

        // Waiter queue must be clean after the timeout
        assert!(lock.waiters().is_empty());
        lock.release();
    }

    #[test]
    fn test_blocked_thread_appears_in_waiters() {
        let lock = bare_lock(LockKind::Exclusive);
        assert!(lock.try_acquire());

        let contender = Arc::clone(&lock);
        let handle = thread::spawn(move || contender.acquire_timeout(Duration::from_secs(2)));

        // Wait for the contender to register
        let deadline = Instant::now() + Duration::from_secs(1);
        while lock.waiters().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(lock.waiters().len(), 1);

        lock.release();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_rwlock_readers_exclude_writer() {
        let lock = bare_lock(LockKind::ReadWrite);
        assert!(lock.try_acquire_shared());
        assert!(!lock.try_acquire());

        let reader = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let ok = reader.try_acquire_shared();
            if ok {
                reader.release_shared();
            }
            ok
        });
        assert!(handle.join().unwrap(), "second reader should be admitted");

        lock.release_shared();
        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    fn test_spin_lock_contended_handoff() {
        let lock = bare_lock(LockKind::Spin);
        assert!(lock.try_acquire());

        let contender = Arc::clone(&lock);
        let acquired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&acquired);
        let handle = thread::spawn(move || {
            let ok = contender.acquire_timeout(Duration::from_secs(2));
            flag.store(ok, Ordering::SeqCst);
            if ok {
                contender.release();
            }
        });

        thread::sleep(Duration::from_millis(20));
        lock.release();
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let lock = bare_lock(LockKind::Exclusive);
        lock.try_acquire();
        let snap = lock.snapshot();
        assert_eq!(snap.owner, Some(get_current_thread_id()));
        assert_eq!(snap.acquisitions, 1);
        assert_eq!(snap.kind, LockKind::Exclusive);
        lock.release();
        assert_eq!(lock.snapshot().owner, None);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = bare_lock(LockKind::Exclusive);
        {
            let _guard = lock.try_lock().unwrap();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }
}
