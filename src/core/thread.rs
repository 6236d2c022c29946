use crate::core::monitor::Monitor;
use crate::core::types::get_current_thread_id;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A wrapper around std::thread::JoinHandle that registers the thread with
/// a monitor
///
/// The spawned thread is recorded in the monitor's thread registry on entry
/// and marked `Terminated` on exit, with a liveness flag the monitor's
/// periodic refresh reconciles against. The closure runs under
/// `catch_unwind` so the exit is always recorded; panics are re-raised for
/// the joiner.
pub struct MonitoredThread<T>(JoinHandle<T>);

impl<T> MonitoredThread<T>
where
    T: Send + 'static,
{
    /// Spawn a new monitored thread
    ///
    /// The thread holds only a weak handle to the monitor, so outliving the
    /// monitor is fine; registration simply stops.
    pub fn spawn<F>(monitor: &Arc<Monitor>, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let weak = Arc::downgrade(monitor);
        let name = name.into();

        let handle = thread::spawn(move || {
            let thread_id = get_current_thread_id();
            let alive = Arc::new(AtomicBool::new(true));
            if let Some(monitor) = weak.upgrade() {
                monitor.record_thread_start(thread_id, &name, Arc::clone(&alive));
            }

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

            alive.store(false, Ordering::SeqCst);
            if let Some(monitor) = weak.upgrade() {
                monitor.record_thread_exit(thread_id);
            }

            match result {
                Ok(val) => val,
                Err(payload) => std::panic::resume_unwind(payload),
            }
        });
        MonitoredThread(handle)
    }

    /// Wait for the thread to finish and return its result
    pub fn join(self) -> thread::Result<T> {
        self.0.join()
    }

    /// Whether the underlying thread has finished running
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}
