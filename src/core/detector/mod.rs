//! Per-tick deadlock detection
//!
//! Each monitoring tick rebuilds a wait-for graph from immutable snapshots
//! of every lock's waiter queue, searches it for cycles, and confirms each
//! candidate against live registry state before raising a deadlock event.
//! Confirmed events are recorded, dispatched to callbacks off the detection
//! path, and handed to the resolution policy.

pub mod race;

pub use race::{NoopRaceDetector, RaceDetector};

use crate::core::graph::WaitForGraph;
use crate::core::locks::LockSnapshot;
use crate::core::monitor::Monitor;
use crate::core::types::{
    DeadlockEvent, LockId, RaceEvent, Resolution, ThreadId, WaitNode,
};
use chrono::Utc;
use crossbeam_channel::{Sender, unbounded};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

pub type DeadlockCallback = Arc<dyn Fn(&DeadlockEvent) + Send + Sync + 'static>;
pub type RaceCallback = Arc<dyn Fn(&RaceEvent) + Send + Sync + 'static>;

/// Signature of a confirmed cycle, used to suppress re-reporting a cycle
/// that persists across consecutive ticks
pub(crate) type CycleSignature = (Vec<ThreadId>, Vec<LockId>);

/// Policy invoked for every confirmed deadlock
///
/// Forced thread termination is deliberately not offered; resolution is
/// cooperative. The default policy cancels the first thread in the cycle
/// through its registered [`CancelToken`](crate::CancelToken), or records
/// the intent if no token was registered.
pub trait ResolutionPolicy: Send + Sync {
    /// Choose and apply an action for the confirmed cycle
    ///
    /// # Arguments
    /// * `thread_cycle` - threads in the cycle, in cycle order (non-empty)
    /// * `monitor` - the owning monitor, for token lookup and registry state
    fn resolve(&self, thread_cycle: &[ThreadId], monitor: &Monitor) -> Resolution;
}

/// Default policy: cancel the first thread in the confirmed cycle
pub struct CancelFirstVictim;

impl ResolutionPolicy for CancelFirstVictim {
    fn resolve(&self, thread_cycle: &[ThreadId], monitor: &Monitor) -> Resolution {
        let victim = thread_cycle[0];
        match monitor.cancel_token_of(victim) {
            Some(token) => {
                token.cancel();
                Resolution::Cancelled { victim }
            }
            None => Resolution::LoggedOnly { victim },
        }
    }
}

/// Work item for the callback dispatcher thread
pub(crate) enum CallbackJob {
    Deadlock(DeadlockEvent),
    Race(RaceEvent),
}

/// Background dispatcher for asynchronous callback execution
///
/// Runs a dedicated thread that receives events through a channel and
/// executes the registered callbacks. Keeping callbacks off the tick loop
/// means a slow or panicking callback can never stall detection; a panic
/// is caught and logged, never propagated.
pub(crate) struct Dispatcher {
    sender: Sender<CallbackJob>,
    _handle: thread::JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the dispatcher thread over the shared callback lists
    pub(crate) fn new(
        deadlock_callbacks: Arc<Mutex<Vec<DeadlockCallback>>>,
        race_callbacks: Arc<Mutex<Vec<RaceCallback>>>,
    ) -> Self {
        let (tx, rx) = unbounded::<CallbackJob>();

        // Exits when every sender is dropped, i.e. when the monitor goes away.
        // The callback list is cloned out of its mutex before invocation so
        // a callback may register further callbacks without deadlocking.
        let handle = thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    CallbackJob::Deadlock(event) => {
                        let callbacks: Vec<DeadlockCallback> =
                            deadlock_callbacks.lock().clone();
                        for callback in callbacks {
                            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                                eprintln!("lockwarden: deadlock callback panicked");
                            }
                        }
                    }
                    CallbackJob::Race(event) => {
                        let callbacks: Vec<RaceCallback> = race_callbacks.lock().clone();
                        for callback in callbacks {
                            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                                eprintln!("lockwarden: race callback panicked");
                            }
                        }
                    }
                }
            }
        });

        Dispatcher {
            sender: tx,
            _handle: handle,
        }
    }

    pub(crate) fn send(&self, job: CallbackJob) {
        let _ = self.sender.send(job);
    }
}

/// Convert a raw node cycle into thread -> lock edges
///
/// The path alternates thread and lock nodes by construction; each thread is
/// paired with the lock node that follows it (wrapping at the end).
pub(crate) fn cycle_edges(cycle: &[WaitNode]) -> Vec<(ThreadId, LockId)> {
    let mut edges = Vec::new();
    for (i, node) in cycle.iter().enumerate() {
        if let WaitNode::Thread(thread_id) = *node
            && let WaitNode::Lock(lock_id) = cycle[(i + 1) % cycle.len()]
        {
            edges.push((thread_id, lock_id));
        }
    }
    edges
}

fn signature(edges: &[(ThreadId, LockId)]) -> CycleSignature {
    let mut threads: Vec<ThreadId> = edges.iter().map(|&(t, _)| t).collect();
    let mut locks: Vec<LockId> = edges.iter().map(|&(_, l)| l).collect();
    threads.sort_unstable();
    threads.dedup();
    locks.sort_unstable();
    locks.dedup();
    (threads, locks)
}

fn describe(edges: &[(ThreadId, LockId)], locks: &FxHashMap<LockId, &LockSnapshot>) -> String {
    let parts: Vec<String> = edges
        .iter()
        .map(|&(thread_id, lock_id)| {
            let lock_name = locks.get(&lock_id).map(|s| s.name.as_str()).unwrap_or("?");
            format!("thread {thread_id} waits on '{lock_name}' (lock {lock_id})")
        })
        .collect();
    format!("deadlock cycle: {}", parts.join(" -> "))
}

impl Monitor {
    /// One deadlock detection pass
    ///
    /// Snapshot, build graph, search for cycles, confirm candidates against
    /// fresh registry state, then record/dispatch/resolve each confirmed
    /// cycle not already reported on the previous tick.
    pub(crate) fn run_deadlock_detection(&self) {
        let snapshots = self.locks.snapshot_all();
        let graph = WaitForGraph::from_snapshots(&snapshots);
        if graph.is_empty() {
            self.seen_cycles.lock().clear();
            return;
        }

        let candidates = graph.find_cycles();
        if candidates.is_empty() {
            self.seen_cycles.lock().clear();
            return;
        }

        // Confirmation snapshot: the graph may already be stale
        let fresh = self.locks.snapshot_all();
        let fresh_by_id: FxHashMap<LockId, &LockSnapshot> =
            fresh.iter().map(|s| (s.id, s)).collect();

        let mut confirmed_signatures = FxHashSet::default();
        let mut events = Vec::new();

        for cycle in candidates {
            let edges = cycle_edges(&cycle);
            let thread_cycle: Vec<ThreadId> = edges.iter().map(|&(t, _)| t).collect();

            // A real deadlock involves at least two distinct threads
            let mut distinct = thread_cycle.clone();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < 2 {
                continue;
            }

            // Every thread must still be a waiter on its mapped lock;
            // anything else is a stale graph snapshot
            let still_waiting = edges.iter().all(|(thread_id, lock_id)| {
                fresh_by_id
                    .get(lock_id)
                    .is_some_and(|snap| snap.waiters.contains(thread_id))
            });
            if !still_waiting {
                continue;
            }

            let sig = signature(&edges);
            let already_reported = self.seen_cycles.lock().contains(&sig);
            confirmed_signatures.insert(sig);
            if already_reported {
                // Cycle persists from an earlier tick; reported once already
                continue;
            }

            // Resolve before sealing the record so the event carries the
            // action actually taken
            let resolution = self.resolution.lock().resolve(&thread_cycle, self);

            let event = DeadlockEvent {
                id: self.next_event_id(),
                timestamp: Utc::now().to_rfc3339(),
                thread_cycle,
                cycle_edges: edges.clone(),
                graph: graph.snapshot(),
                resolution,
                description: describe(&edges, &fresh_by_id),
            };
            events.push(event);
        }

        // Signatures no longer confirmed drop out, so a cycle that breaks
        // and re-forms is reported again
        *self.seen_cycles.lock() = confirmed_signatures;

        for event in events {
            eprintln!(
                "lockwarden: {} (resolution: victim thread {})",
                event.description,
                event.resolution.victim()
            );
            self.logger.log_warning(event.description.clone());
            self.deadlocks.push(event.clone());
            self.counters.bump_deadlocks();
            self.dispatcher.send(CallbackJob::Deadlock(event));
        }
    }

    /// One race detection pass; a hook unless a detector was installed
    pub(crate) fn run_race_detection(&self) {
        let guard = self.race_detector.lock();
        let Some(detector) = guard.as_ref() else {
            return;
        };
        let found = detector.scan();
        drop(guard);

        for mut event in found {
            event.id = self.next_event_id();
            if event.timestamp.is_empty() {
                event.timestamp = Utc::now().to_rfc3339();
            }
            self.races.push(event.clone());
            self.counters.bump_races();
            self.dispatcher.send(CallbackJob::Race(event));
        }
    }
}
