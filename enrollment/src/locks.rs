//! Per-key mutual exclusion.
//!
//! One mutex per event id (seat decisions) and one per procedure id (draws),
//! so unrelated events and rounds never wait on each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Registry of lazily created mutexes, one per key
///
/// An entry lives only while some caller holds or waits on it, so the
/// registry stays as small as the set of contended keys.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `critical` while holding the lock for `key`
    ///
    /// The guarded data is `()`, so a panic in another holder leaves nothing
    /// inconsistent behind and a poisoned lock is simply taken over.
    pub fn with_lock<T>(&self, key: &K, critical: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            critical()
        };

        // Clones are only taken under the registry lock, so a count of two
        // (the map and `lock`) means nobody else is waiting.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        result
    }

    /// Number of keys currently held or waited on
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
