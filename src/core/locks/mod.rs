pub mod monitored;

pub use monitored::{LockGuard, LockSnapshot, MonitoredLock};

use std::sync::atomic::AtomicUsize;

pub(crate) static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);
