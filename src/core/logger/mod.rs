//! Logging functionality for Lockwarden
//!
//! This module provides JSON-lines logging of lock events and thread
//! lifecycle events, supporting offline inspection of monitor activity.

mod event_logger;

pub use event_logger::{EventLogger, LogEntry};
