use crate::core::types::{LockId, ThreadId, ThreadState};
use chrono::{DateTime, Utc};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag
///
/// Tokens are registered per thread and tripped by the deadlock resolution
/// policy. Workers poll the token between units of work; nothing is ever
/// terminated forcibly.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the owner's current unit of work
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set
    ///
    /// Used by workers that have observed the request and abandoned their
    /// current unit of work.
    pub fn take_cancelled(&self) -> bool {
        self.inner.swap(false, Ordering::SeqCst)
    }
}

/// Exported view of one registered thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub locks_held: Vec<LockId>,
    pub locks_waiting: Vec<LockId>,
    pub created_at: String,
    pub last_activity: String,
    pub stack: Option<String>,
}

/// One record per discovered thread
struct ThreadEntry {
    name: String,
    state: ThreadState,
    locks_held: FxHashSet<LockId>,
    locks_waiting: FxHashSet<LockId>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    /// Captured call-stack snapshot, if the integrator provided one
    stack: Option<String>,
    /// Liveness flag maintained by MonitoredThread; None for threads only
    /// ever observed through lock events
    alive: Option<Arc<AtomicBool>>,
    cancel: Option<CancelToken>,
}

impl ThreadEntry {
    fn new(name: String) -> Self {
        let now = Utc::now();
        ThreadEntry {
            name,
            state: ThreadState::Running,
            locks_held: FxHashSet::default(),
            locks_waiting: FxHashSet::default(),
            created_at: now,
            last_activity: now,
            stack: None,
            alive: None,
            cancel: None,
        }
    }
}

/// Tracks discovered threads, their state, and which locks each holds/awaits
///
/// All mutation flows through the monitor's recording methods, which call
/// into this registry; no caller mutates a record directly. Every operation
/// takes the registry's internal mutex, giving one serialization point for
/// thread records.
pub struct ThreadRegistry {
    threads: Mutex<FxHashMap<ThreadId, ThreadEntry>>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        ThreadRegistry {
            threads: Mutex::new(FxHashMap::default()),
        }
    }

    /// Ensure a thread is registered, creating it in `Running` state
    ///
    /// # Returns
    /// `true` if the thread was newly registered
    pub fn observe(&self, thread_id: ThreadId, name: Option<&str>) -> bool {
        let mut threads = self.threads.lock();
        match threads.get_mut(&thread_id) {
            Some(entry) => {
                entry.last_activity = Utc::now();
                if let Some(name) = name {
                    entry.name = name.to_owned();
                }
                false
            }
            None => {
                let name = name
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("thread-{thread_id}"));
                threads.insert(thread_id, ThreadEntry::new(name));
                true
            }
        }
    }

    /// Record that a thread is blocked waiting on a lock
    pub fn record_wait(&self, thread_id: ThreadId, lock_id: LockId) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id) {
            entry.locks_waiting.insert(lock_id);
            entry.state = ThreadState::Blocked;
            entry.last_activity = Utc::now();
        }
    }

    /// Clear a thread's wait on a lock (acquired, timed out, or gave up)
    pub fn clear_wait(&self, thread_id: ThreadId, lock_id: LockId) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id) {
            entry.locks_waiting.remove(&lock_id);
            if entry.locks_waiting.is_empty() && entry.state == ThreadState::Blocked {
                entry.state = ThreadState::Running;
            }
            entry.last_activity = Utc::now();
        }
    }

    /// Record that a thread now holds a lock
    pub fn record_held(&self, thread_id: ThreadId, lock_id: LockId) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id) {
            entry.locks_waiting.remove(&lock_id);
            entry.locks_held.insert(lock_id);
            if entry.locks_waiting.is_empty() && entry.state == ThreadState::Blocked {
                entry.state = ThreadState::Running;
            }
            entry.last_activity = Utc::now();
        }
    }

    /// Remove a lock from a thread's held set
    ///
    /// # Returns
    /// `true` if the thread was actually holding the lock
    pub fn clear_held(&self, thread_id: ThreadId, lock_id: LockId) -> bool {
        let mut threads = self.threads.lock();
        match threads.get_mut(&thread_id) {
            Some(entry) => {
                entry.last_activity = Utc::now();
                entry.locks_held.remove(&lock_id)
            }
            None => false,
        }
    }

    /// Mark a thread as actively working again
    pub fn mark_running(&self, thread_id: ThreadId) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id)
            && entry.state != ThreadState::Terminated
        {
            entry.state = ThreadState::Running;
            entry.last_activity = Utc::now();
        }
    }

    /// Mark a thread idle between units of work
    pub fn mark_waiting(&self, thread_id: ThreadId) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id)
            && entry.state != ThreadState::Terminated
        {
            entry.state = ThreadState::Waiting;
        }
    }

    /// Mark a thread as exited; the record is retained
    pub fn mark_terminated(&self, thread_id: ThreadId) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id) {
            entry.state = ThreadState::Terminated;
            entry.last_activity = Utc::now();
        }
    }

    /// Attach a liveness flag so the periodic refresh can observe thread exit
    pub fn register_liveness(&self, thread_id: ThreadId, alive: Arc<AtomicBool>) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id) {
            entry.alive = Some(alive);
        }
    }

    /// Attach a captured call-stack snapshot to a thread record
    pub fn record_stack(&self, thread_id: ThreadId, stack: String) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id) {
            entry.stack = Some(stack);
        }
    }

    /// Register a cancellation token for a thread
    pub fn register_cancel_token(&self, thread_id: ThreadId, token: CancelToken) {
        let mut threads = self.threads.lock();
        if let Some(entry) = threads.get_mut(&thread_id) {
            entry.cancel = Some(token);
        }
    }

    /// Fetch the cancellation token registered for a thread, if any
    pub fn cancel_token(&self, thread_id: ThreadId) -> Option<CancelToken> {
        self.threads.lock().get(&thread_id)?.cancel.clone()
    }

    /// Reconcile recorded state against liveness flags
    ///
    /// Threads whose liveness flag has gone false transition to `Terminated`.
    /// Threads without a flag keep whatever state lock events gave them.
    pub fn refresh(&self) {
        let mut threads = self.threads.lock();
        for entry in threads.values_mut() {
            if entry.state == ThreadState::Terminated {
                continue;
            }
            if let Some(alive) = &entry.alive
                && !alive.load(Ordering::SeqCst)
            {
                entry.state = ThreadState::Terminated;
            }
        }
    }

    pub fn state_of(&self, thread_id: ThreadId) -> Option<ThreadState> {
        self.threads.lock().get(&thread_id).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    /// Copy out every thread record for detection or export
    pub fn snapshot_all(&self) -> Vec<ThreadSnapshot> {
        let threads = self.threads.lock();
        let mut snapshots: Vec<ThreadSnapshot> = threads
            .iter()
            .map(|(&id, entry)| {
                let mut locks_held: Vec<LockId> = entry.locks_held.iter().copied().collect();
                locks_held.sort_unstable();
                let mut locks_waiting: Vec<LockId> = entry.locks_waiting.iter().copied().collect();
                locks_waiting.sort_unstable();
                ThreadSnapshot {
                    id,
                    name: entry.name.clone(),
                    state: entry.state,
                    locks_held,
                    locks_waiting,
                    created_at: entry.created_at.to_rfc3339(),
                    last_activity: entry.last_activity.to_rfc3339(),
                    stack: entry.stack.clone(),
                }
            })
            .collect();
        snapshots.sort_unstable_by_key(|s| s.id);
        snapshots
    }

    /// Drop every record; only an explicit reset removes threads
    pub fn reset(&self) {
        self.threads.lock().clear();
    }
}
