//! Monitored worker pool
//!
//! A fixed set of persistent worker threads pulling tasks from a shared,
//! unbounded queue. Workers are spawned as [`MonitoredThread`]s so the
//! monitor sees their lifecycle, and each registers a cancellation token so
//! the deadlock resolution policy has something cooperative to trip.
//!
//! Task records are never evicted from the queue; status lookup is a linear
//! scan. This bounds scalability to workloads where the total task count
//! stays modest, which is what the monitor's own consumers need.

use crate::core::monitor::Monitor;
use crate::core::thread::MonitoredThread;
use crate::core::types::{TaskId, get_current_thread_id};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How long an idle worker sleeps before rescanning the queue
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Bounded wait for workers to observe shutdown before they are detached
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

type TaskFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Lifecycle of one submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Queue entry: the task record plus its not-yet-run work
struct TaskSlot {
    id: TaskId,
    state: TaskState,
    /// Taken by the worker that starts the task
    work: Option<TaskFn>,
    error: Option<String>,
    submitted_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// Status view returned by [`WorkerPool::task_status`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub state: TaskState,
    pub error: Option<String>,
    pub submitted_at: String,
    pub finished_at: Option<String>,
}

/// Counter snapshot for operational tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatistics {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: usize,
}

/// A fixed-size pool of monitored worker threads over a shared task queue
///
/// # Example
///
/// ```rust
/// use lockwarden::{Monitor, WorkerPool};
/// use std::time::{Duration, Instant};
///
/// let monitor = Monitor::new();
/// let pool = WorkerPool::new(&monitor);
/// pool.start(2);
///
/// let task = pool.submit(|| Ok(()));
///
/// // Let the queue drain, then shut down
/// let deadline = Instant::now() + Duration::from_secs(5);
/// while pool.statistics().completed == 0 && Instant::now() < deadline {
///     std::thread::sleep(Duration::from_millis(5));
/// }
/// pool.stop();
///
/// assert_eq!(pool.statistics().completed, 1);
/// assert!(pool.task_status(task).is_some());
/// ```
pub struct WorkerPool {
    monitor: Arc<Monitor>,
    queue: Arc<Mutex<Vec<TaskSlot>>>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<MonitoredThread<()>>>,
    worker_count: AtomicUsize,
    next_task_id: AtomicUsize,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(monitor: &Arc<Monitor>) -> Self {
        WorkerPool {
            monitor: Arc::clone(monitor),
            queue: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            worker_count: AtomicUsize::new(0),
            next_task_id: AtomicUsize::new(1),
            submitted: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawn the worker threads
    ///
    /// Does nothing if the pool already has workers.
    pub fn start(&self, worker_count: usize) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        self.shutdown.store(false, Ordering::SeqCst);
        self.worker_count.store(worker_count, Ordering::SeqCst);

        for i in 0..worker_count {
            let monitor = Arc::clone(&self.monitor);
            let queue = Arc::clone(&self.queue);
            let shutdown = Arc::clone(&self.shutdown);
            let completed = Arc::clone(&self.completed);
            let failed = Arc::clone(&self.failed);
            let worker = MonitoredThread::spawn(
                &self.monitor,
                format!("pool-worker-{i}"),
                move || worker_loop(monitor, queue, shutdown, completed, failed),
            );
            workers.push(worker);
        }
    }

    /// Enqueue a task; returns its id immediately
    ///
    /// The queue is unbounded, there is no backpressure.
    pub fn submit<F>(&self, work: F) -> TaskId
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().push(TaskSlot {
            id,
            state: TaskState::Pending,
            work: Some(Box::new(work)),
            error: None,
            submitted_at: Utc::now(),
            finished_at: None,
        });
        id
    }

    /// Look up a task by id (linear scan; tasks are never evicted)
    pub fn task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        let queue = self.queue.lock();
        queue.iter().find(|slot| slot.id == task_id).map(|slot| TaskStatus {
            id: slot.id,
            state: slot.state,
            error: slot.error.clone(),
            submitted_at: slot.submitted_at.to_rfc3339(),
            finished_at: slot.finished_at.map(|t| t.to_rfc3339()),
        })
    }

    /// Signal shutdown and join workers with a bounded timeout
    ///
    /// Workers mid-task are not interrupted; they observe the shutdown flag
    /// between tasks. A worker still running at the deadline is detached
    /// and logged.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let workers: Vec<MonitoredThread<()>> = self.workers.lock().drain(..).collect();
        self.worker_count.store(0, Ordering::SeqCst);

        let deadline = Instant::now() + STOP_TIMEOUT;
        for worker in workers {
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                eprintln!("lockwarden: pool worker did not stop before the deadline; detaching");
            }
        }
    }

    pub fn statistics(&self) -> PoolStatistics {
        let pending = self
            .queue
            .lock()
            .iter()
            .filter(|slot| slot.state == TaskState::Pending)
            .count();
        PoolStatistics {
            workers: self.worker_count.load(Ordering::SeqCst),
            submitted: self.submitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            pending,
        }
    }
}

fn worker_loop(
    monitor: Arc<Monitor>,
    queue: Arc<Mutex<Vec<TaskSlot>>>,
    shutdown: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) {
    let thread_id = get_current_thread_id();
    let cancel = monitor.register_cancel_token(thread_id);

    while !shutdown.load(Ordering::SeqCst) {
        if cancel.take_cancelled() {
            // A resolution policy asked us to abandon the current unit of
            // work; between tasks there is nothing to abandon
            eprintln!("lockwarden: pool worker {thread_id} observed a cancellation request");
        }

        // Claim the first task nobody has started
        let claimed = {
            let mut queue = queue.lock();
            queue
                .iter_mut()
                .find(|slot| slot.state == TaskState::Pending)
                .map(|slot| {
                    slot.state = TaskState::Running;
                    (slot.id, slot.work.take())
                })
        };

        let Some((task_id, work)) = claimed else {
            monitor.record_worker_idle(thread_id);
            thread::sleep(IDLE_POLL);
            continue;
        };
        monitor.record_worker_busy(thread_id);

        let outcome = work.map(|work| catch_unwind(AssertUnwindSafe(work)));

        let mut queue = queue.lock();
        if let Some(slot) = queue.iter_mut().find(|slot| slot.id == task_id) {
            slot.finished_at = Some(Utc::now());
            match outcome {
                Some(Ok(Ok(()))) => {
                    slot.state = TaskState::Completed;
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                Some(Ok(Err(e))) => {
                    slot.state = TaskState::Failed;
                    slot.error = Some(format!("{e:#}"));
                    failed.fetch_add(1, Ordering::SeqCst);
                }
                Some(Err(_)) => {
                    slot.state = TaskState::Failed;
                    slot.error = Some("task panicked".to_owned());
                    failed.fetch_add(1, Ordering::SeqCst);
                }
                // Claimed slots always carry their work fn; nothing to do
                None => {}
            }
        }
    }
}
