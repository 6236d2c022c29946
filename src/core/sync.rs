//! Minimal thread-safe value containers
//!
//! Ordinary mutex-guarded containers used as building blocks by the monitor's
//! event logs and the worker pool queue. Every operation takes the container's
//! internal mutex; values are handed out by clone so no guard escapes.

use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::hash::Hash;

/// A mutex-guarded hash map
pub struct SyncMap<K, V> {
    inner: Mutex<FxHashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> SyncMap<K, V> {
    pub fn new() -> Self {
        SyncMap {
            inner: Mutex::new(FxHashMap::default()),
        }
    }

    /// Insert a value, returning the previous value for the key if any
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().insert(key, value)
    }

    /// Clone out the value for a key
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear()
    }
}

impl<K: Eq + Hash, V: Clone> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutex-guarded append-only list
pub struct SyncList<T> {
    inner: Mutex<Vec<T>>,
}

impl<T: Clone> SyncList<T> {
    pub fn new() -> Self {
        SyncList {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, value: T) {
        self.inner.lock().push(value)
    }

    /// Clone out the full contents
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear()
    }
}

impl<T: Clone> Default for SyncList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutex-guarded signed counter
pub struct SyncCounter {
    inner: Mutex<i64>,
}

impl SyncCounter {
    pub fn new() -> Self {
        SyncCounter {
            inner: Mutex::new(0),
        }
    }

    /// Add a delta and return the new value
    pub fn add(&self, delta: i64) -> i64 {
        let mut value = self.inner.lock();
        *value += delta;
        *value
    }

    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    pub fn get(&self) -> i64 {
        *self.inner.lock()
    }
}

impl Default for SyncCounter {
    fn default() -> Self {
        Self::new()
    }
}
