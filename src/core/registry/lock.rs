use crate::core::locks::{LockSnapshot, MonitoredLock};
use crate::core::types::LockId;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;

struct Inner {
    locks: FxHashMap<LockId, Arc<MonitoredLock>>,
    /// Name index used by the atomic section protocol to reuse per-resource locks
    by_name: FxHashMap<String, LockId>,
}

/// Registry of every lock created through the monitor
///
/// The registry owns the locks; callers and the atomic section protocol hold
/// `Arc` handles. Lock records are destroyed only via explicit cleanup.
pub struct LockRegistry {
    inner: Mutex<Inner>,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry {
            inner: Mutex::new(Inner {
                locks: FxHashMap::default(),
                by_name: FxHashMap::default(),
            }),
        }
    }

    pub fn register(&self, lock: Arc<MonitoredLock>) {
        let mut inner = self.inner.lock();
        inner.by_name.insert(lock.name().to_owned(), lock.id());
        inner.locks.insert(lock.id(), lock);
    }

    pub fn get(&self, lock_id: LockId) -> Option<Arc<MonitoredLock>> {
        self.inner.lock().locks.get(&lock_id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<MonitoredLock>> {
        let inner = self.inner.lock();
        let id = inner.by_name.get(name)?;
        inner.locks.get(id).cloned()
    }

    /// Look up a lock by name, registering a freshly made one if absent
    ///
    /// The whole operation happens under the registry mutex so two threads
    /// racing on the same resource name end up sharing one lock.
    ///
    /// # Returns
    /// The lock and whether it was newly created
    pub fn get_or_register_with(
        &self,
        name: &str,
        make: impl FnOnce() -> Arc<MonitoredLock>,
    ) -> (Arc<MonitoredLock>, bool) {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.by_name.get(name)
            && let Some(lock) = inner.locks.get(id)
        {
            return (Arc::clone(lock), false);
        }
        let lock = make();
        inner.by_name.insert(lock.name().to_owned(), lock.id());
        inner.locks.insert(lock.id(), Arc::clone(&lock));
        (lock, true)
    }

    /// Drop a lock record; outstanding `Arc` handles keep the lock usable
    pub fn remove(&self, lock_id: LockId) -> Option<Arc<MonitoredLock>> {
        let mut inner = self.inner.lock();
        let lock = inner.locks.remove(&lock_id)?;
        inner.by_name.remove(lock.name());
        Some(lock)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().locks.is_empty()
    }

    /// Copy-then-analyze: clone the handles out under the registry mutex,
    /// then snapshot each lock without holding it
    pub fn snapshot_all(&self) -> Vec<LockSnapshot> {
        let handles: Vec<Arc<MonitoredLock>> = {
            let inner = self.inner.lock();
            inner.locks.values().cloned().collect()
        };
        let mut snapshots: Vec<LockSnapshot> = handles.iter().map(|l| l.snapshot()).collect();
        snapshots.sort_unstable_by_key(|s| s.id);
        snapshots
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.locks.clear();
        inner.by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LockKind;
    use std::sync::Weak;

    fn make(name: &str) -> Arc<MonitoredLock> {
        Arc::new(MonitoredLock::new(name, LockKind::Exclusive, Weak::new()))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = LockRegistry::new();
        let lock = make("a");
        let id = lock.id();
        registry.register(Arc::clone(&lock));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().name(), "a");
        assert_eq!(registry.get_by_name("a").unwrap().id(), id);
        assert!(registry.get_by_name("b").is_none());
    }

    #[test]
    fn test_remove_clears_name_index() {
        let registry = LockRegistry::new();
        let lock = make("a");
        let id = lock.id();
        registry.register(lock);

        assert!(registry.remove(id).is_some());
        assert!(registry.get_by_name("a").is_none());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn test_snapshot_all_sorted_by_id() {
        let registry = LockRegistry::new();
        registry.register(make("x"));
        registry.register(make("y"));
        let snaps = registry.snapshot_all();
        assert_eq!(snaps.len(), 2);
        assert!(snaps[0].id < snaps[1].id);
    }
}
