use crossbeam_channel::{Receiver, unbounded};
use lockwarden::{DeadlockEvent, Monitor, MonitorConfig};
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
pub const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(3);
#[allow(dead_code)]
pub const NO_DEADLOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Fast tick so tests detect within milliseconds instead of seconds
#[allow(dead_code)]
pub const FAST_TICK: Duration = Duration::from_millis(25);

pub struct MonitorHarness {
    pub monitor: Arc<Monitor>,
    pub events: Receiver<DeadlockEvent>,
}

/// Start a monitor with a fast tick and a channel-backed deadlock callback
pub fn start_monitor() -> MonitorHarness {
    let (tx, rx) = unbounded::<DeadlockEvent>();

    let monitor = MonitorConfig::new()
        .tick_interval(FAST_TICK)
        .build()
        .expect("Failed to build monitor");
    monitor.add_deadlock_callback(move |event| {
        let _ = tx.send(event.clone());
    });
    monitor.start();

    MonitorHarness {
        monitor,
        events: rx,
    }
}

#[allow(dead_code)]
pub fn expect_deadlock(harness: &MonitorHarness, timeout: Duration) -> DeadlockEvent {
    match harness.events.recv_timeout(timeout) {
        Ok(event) => event,
        Err(_) => panic!("No deadlock detected within {timeout:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_no_deadlock(harness: &MonitorHarness, timeout: Duration) {
    assert!(
        harness.events.recv_timeout(timeout).is_err(),
        "Unexpected deadlock detected"
    );
    assert_eq!(harness.monitor.statistics().total_deadlocks, 0);
}
