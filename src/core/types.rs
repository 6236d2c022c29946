use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread identifier type
///
/// Uniquely identifies a thread in the application.
pub type ThreadId = usize;

// Global counter for assigning unique thread IDs
static THREAD_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

// Thread-local storage for each thread's assigned ID
thread_local! {
    static THREAD_ID: ThreadId = {
        // Each thread gets a unique ID once, when this is first accessed
        THREAD_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    };
}

/// Get a unique identifier of the current thread
/// This will always return the same ID for the lifetime of the thread
pub fn get_current_thread_id() -> ThreadId {
    THREAD_ID.with(|&id| id)
}

/// Lock identifier type
///
/// Uniquely identifies a lock in the application. Each MonitoredLock
/// is assigned a unique ID when created.
pub type LockId = usize;

/// Task identifier assigned by the worker pool on submission
pub type TaskId = usize;

/// Identifier of one atomic multi-resource operation
pub type OperationId = usize;

/// The flavor of a monitored lock, fixed at creation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Plain mutual exclusion, one holder at a time
    Exclusive,
    /// Exclusive lock that its current holder may re-acquire without blocking
    Reentrant,
    /// Shared readers or one exclusive writer
    ReadWrite,
    /// Mutual exclusion acquired by spinning instead of parking
    Spin,
}

/// Observed state of a registered thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is live and not known to be blocked
    Running,
    /// Thread is idle between units of work
    Waiting,
    /// Thread is blocked trying to acquire a lock
    Blocked,
    /// Underlying thread has exited; record is retained until registry reset
    Terminated,
}

/// Represents the type of lock/thread event that occurred
///
/// These events are used to track the lifecycle of threads and locks
/// and their interactions, which is essential for deadlock detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LockEvent {
    /// A new thread/lock was created
    Created,
    /// The thread/lock exited or was destroyed
    Destroyed,
    /// Thread is attempting to acquire a lock
    Attempt,
    /// Thread successfully acquired a lock
    Acquired,
    /// Thread released a lock
    Released,
    /// Thread gave up waiting for a lock (timeout or non-blocking failure)
    Abandoned,
}

/// One node of the wait-for graph
///
/// The graph is bipartite: thread nodes point at the lock they are blocked
/// on, lock nodes point at the thread that currently holds them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "node", content = "id", rename_all = "snake_case")]
pub enum WaitNode {
    Thread(ThreadId),
    Lock(LockId),
}

/// Serializable adjacency snapshot of the wait-for graph at detection time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Directed edges, each `(from, to)`
    pub edges: Vec<(WaitNode, WaitNode)>,
}

/// Action taken for a confirmed deadlock
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    /// The victim's cancellation token was tripped
    Cancelled { victim: ThreadId },
    /// No token was registered for the victim; the intent was only recorded
    LoggedOnly { victim: ThreadId },
}

impl Resolution {
    /// Thread chosen by the resolution policy
    pub fn victim(&self) -> ThreadId {
        match *self {
            Resolution::Cancelled { victim } | Resolution::LoggedOnly { victim } => victim,
        }
    }
}

/// Immutable record of one confirmed deadlock
///
/// This structure contains detailed information about a detected deadlock,
/// including which threads are involved in the cycle and which locks they are
/// waiting for. It is appended to the monitor's event log, passed to every
/// registered deadlock callback, and included in exported reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockEvent {
    /// Monitor-assigned event id
    pub id: usize,

    /// ISO-8601 timestamp of when the deadlock was confirmed
    pub timestamp: String,

    /// List of threads involved in the deadlock cycle
    ///
    /// This is the ordered list of threads that form a cycle in the wait-for
    /// graph. For example, if thread 1 is waiting for a lock held by thread 2,
    /// and thread 2 is waiting for a lock held by thread 1, the cycle would
    /// be [1, 2].
    pub thread_cycle: Vec<ThreadId>,

    /// The cycle expressed as thread -> lock edges
    ///
    /// Each tuple is (thread_id, lock_id): the thread is blocked waiting to
    /// acquire that lock.
    pub cycle_edges: Vec<(ThreadId, LockId)>,

    /// Full wait-for graph at detection time
    pub graph: GraphSnapshot,

    /// Resolution action taken for this cycle
    pub resolution: Resolution,

    /// Human-readable description of the cycle
    pub description: String,
}

/// Record of a detected race condition
///
/// Only produced by a user-supplied [`RaceDetector`](crate::RaceDetector);
/// the default detector produces none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceEvent {
    /// Monitor-assigned event id
    pub id: usize,
    /// ISO-8601 timestamp of detection
    pub timestamp: String,
    /// Name of the shared resource the race was observed on
    pub resource: String,
    /// Threads involved in the unsynchronized access
    pub threads: Vec<ThreadId>,
    /// Human-readable description
    pub description: String,
}

/// Descriptor of one logically-atomic multi-resource unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicOperation {
    /// Monitor-assigned operation id
    pub id: OperationId,
    /// Thread that ran the section
    pub thread_id: ThreadId,
    /// Resource names the section acquired, in acquisition order
    pub resources: Vec<String>,
    /// Per-section acquisition timeout in milliseconds, if any
    pub timeout_ms: Option<u64>,
    /// How many extra acquisition rounds were budgeted
    pub retries: u32,
    /// Whether the protected work ran to completion
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_thread_id_consistency() {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let id1 = get_current_thread_id();
            let id2 = get_current_thread_id();

            // All calls should return the same ID
            assert_eq!(id1, id2);

            tx.send(id1).unwrap();
        });

        let thread_id = rx.recv().unwrap();
        handle.join().unwrap();
        assert!(thread_id > 0);
    }

    #[test]
    fn test_thread_id_uniqueness() {
        let (tx, rx) = mpsc::channel();

        let mut handles = vec![];
        for _ in 0..10 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                tx.send(get_current_thread_id()).unwrap();
            }));
        }

        let mut ids = vec![];
        for _ in 0..10 {
            ids.push(rx.recv().unwrap());
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Verify all IDs are unique
        let mut unique_ids = ids.clone();
        unique_ids.sort();
        unique_ids.dedup();
        assert_eq!(ids.len(), unique_ids.len());
    }

    #[test]
    fn test_wait_node_serde_round_trip() {
        let nodes = vec![WaitNode::Thread(3), WaitNode::Lock(7)];
        let json = serde_json::to_string(&nodes).unwrap();
        let back: Vec<WaitNode> = serde_json::from_str(&json).unwrap();
        assert_eq!(nodes, back);
    }
}
