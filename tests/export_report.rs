use lockwarden::{LockKind, Monitor, MonitorReport};
use std::fs;

/// A report written after zero events parses back with empty lists and an
/// internally consistent statistics block
#[test]
fn test_empty_report_round_trips() {
    let monitor = Monitor::new();
    let file = tempfile::NamedTempFile::new().unwrap();

    monitor.export_report(file.path()).unwrap();

    let raw = fs::read_to_string(file.path()).unwrap();
    let report: MonitorReport = serde_json::from_str(&raw).unwrap();

    assert_eq!(report.statistics.total_locks, report.locks.len() as u64);
    assert_eq!(report.statistics.total_threads, report.threads.len() as u64);
    assert_eq!(
        report.statistics.total_deadlocks,
        report.deadlocks.len() as u64
    );
    assert_eq!(
        report.statistics.total_races,
        report.race_conditions.len() as u64
    );
    assert_eq!(
        report.statistics.total_atomic_operations,
        report.atomic_operations.len() as u64
    );
    assert!(report.locks.is_empty());
    assert!(report.deadlocks.is_empty());
    assert!(!report.timestamp.is_empty());
}

#[test]
fn test_populated_report_lists_locks_and_threads() {
    let monitor = Monitor::new();
    let lock = monitor.create_lock("cache", LockKind::ReadWrite);
    assert!(lock.try_acquire());

    let file = tempfile::NamedTempFile::new().unwrap();
    monitor.export_report(file.path()).unwrap();
    lock.release();

    let raw = fs::read_to_string(file.path()).unwrap();
    let report: MonitorReport = serde_json::from_str(&raw).unwrap();

    assert_eq!(report.locks.len(), 1);
    assert_eq!(report.locks[0].name, "cache");
    assert_eq!(report.locks[0].owner, Some(lockwarden::get_current_thread_id()));
    assert_eq!(report.statistics.total_locks, 1);
    // The acquiring thread was observed
    assert!(
        report
            .threads
            .iter()
            .any(|t| t.id == lockwarden::get_current_thread_id())
    );
}

#[test]
fn test_export_to_bad_path_returns_error_without_panicking() {
    let monitor = Monitor::new();
    let result = monitor.export_report("/nonexistent-dir/report.json");
    assert!(result.is_err());
}
