//! Keyed asynchronous locks.
//!
//! [`KeyedLocks`] hands out one exclusive lock per key (an instance, an index record, an
//! update operation) without a process-wide lock across keys. Entries are created on demand
//! and pruned when the last guard for a key is dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type Slot = Arc<AsyncMutex<()>>;

/// Guard that releases a keyed lock when dropped.
pub struct KeyedLockGuard<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    locks: KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> KeyedLockGuard<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn drop(&mut self) {
        // Release the async mutex before pruning so the strong count reflects waiters only.
        self.guard.take();
        self.locks.prune(&self.key);
    }
}

/// A set of independent locks addressed by key.
pub struct KeyedLocks<K> {
    slots: Arc<Mutex<HashMap<K, Slot>>>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Waits until the lock for `key` is free and takes it.
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let slot = self.slot(key);
        let guard = slot.lock_owned().await;
        trace!(?key, "acquired keyed lock");
        KeyedLockGuard {
            locks: self.clone(),
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Takes the lock for `key` only if nobody holds it.
    pub fn try_lock(&self, key: &K) -> Option<KeyedLockGuard<K>> {
        let slot = self.slot(key);
        match slot.try_lock_owned() {
            Ok(guard) => Some(KeyedLockGuard {
                locks: self.clone(),
                key: key.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.prune(key);
                None
            }
        }
    }

    /// Whether any lock entry is currently tracked for `key`.
    pub fn is_tracked(&self, key: &K) -> bool {
        self.slots.lock().contains_key(key)
    }

    fn prune(&self, key: &K) {
        let mut slots = self.slots.lock();
        let unused = slots
            .get(key)
            .map(|slot| Arc::strong_count(slot) == 1)
            .unwrap_or(false);
        if unused {
            slots.remove(key);
            trace!(?key, "released keyed lock");
        }
    }
}
