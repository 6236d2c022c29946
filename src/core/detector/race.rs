use crate::core::types::RaceEvent;

/// Extension point for race condition detection
///
/// Invoked once per monitoring tick, after deadlock detection. The monitor
/// ships no real detection logic: implementors that track resource accesses
/// can return events here and the monitor will record them, bump the race
/// counter, and dispatch the registered race callbacks. Event ids are
/// assigned by the monitor; whatever `id` the implementation fills in is
/// overwritten.
pub trait RaceDetector: Send + Sync {
    /// Inspect whatever access tracking the implementation maintains and
    /// report any races observed since the last scan
    fn scan(&self) -> Vec<RaceEvent>;
}

/// Default detector: performs no tracking and reports nothing
pub struct NoopRaceDetector;

impl RaceDetector for NoopRaceDetector {
    fn scan(&self) -> Vec<RaceEvent> {
        Vec::new()
    }
}
