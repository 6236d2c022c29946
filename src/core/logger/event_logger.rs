use crate::core::types::{LockEvent, LockId, ThreadId};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Structure for a single log entry
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    /// A thread interacted with a lock
    Interaction {
        /// Thread that performed the action
        thread_id: ThreadId,
        /// Lock that was involved
        lock_id: LockId,
        /// Type of event that occurred
        event: LockEvent,
        /// Seconds since the Unix epoch, microsecond precision
        timestamp: f64,
    },
    /// A thread lifecycle event
    Thread {
        thread_id: ThreadId,
        event: LockEvent,
        timestamp: f64,
    },
    /// A non-fatal internal warning
    Warning { message: String, timestamp: f64 },
}

/// Determines how the logger should operate
#[derive(Debug)]
enum LoggerMode {
    /// Logging is disabled entirely
    Disabled,
    /// Log to the specified file
    ToFile(Mutex<File>),
}

/// Logger for recording instrumentation events as JSON lines
pub struct EventLogger {
    mode: LoggerMode,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLogger {
    /// Create a new logger with logging disabled
    pub fn new() -> Self {
        EventLogger {
            mode: LoggerMode::Disabled,
        }
    }

    /// Create a new logger that appends to the specified file
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open log file")?;

        Ok(EventLogger {
            mode: LoggerMode::ToFile(Mutex::new(file)),
        })
    }

    /// Log a thread/lock interaction event
    pub fn log_interaction(&self, thread_id: ThreadId, lock_id: LockId, event: LockEvent) {
        self.write(LogEntry::Interaction {
            thread_id,
            lock_id,
            event,
            timestamp: now_epoch(),
        });
    }

    /// Log a thread lifecycle event
    pub fn log_thread(&self, thread_id: ThreadId, event: LockEvent) {
        self.write(LogEntry::Thread {
            thread_id,
            event,
            timestamp: now_epoch(),
        });
    }

    /// Log a non-fatal internal warning
    pub fn log_warning(&self, message: impl Into<String>) {
        self.write(LogEntry::Warning {
            message: message.into(),
            timestamp: now_epoch(),
        });
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, LoggerMode::Disabled)
    }

    fn write(&self, entry: LogEntry) {
        // Early return if logging is disabled
        let LoggerMode::ToFile(file) = &self.mode else {
            return;
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            let mut file = file.lock();
            let _ = writeln!(file, "{}", json);
            let _ = file.flush();
        }
    }
}

/// Absolute timestamp as f64: seconds since Unix epoch with microsecond precision
fn now_epoch() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0
}
