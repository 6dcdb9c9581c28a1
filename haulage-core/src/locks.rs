//! Keyed mutual exclusion with bounded waits.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::DispatchError;

/// Default wait before giving up with `ContentionTimeout`.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A family of async mutexes, one per key, created on demand.
///
/// Entries hold only a weak reference, so a key's mutex lives exactly as long
/// as someone holds or waits for it. Dead entries are pruned on insert.
pub struct KeyedLocks<K> {
    name: &'static str,
    timeout: Duration,
    locks: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

/// Held while the keyed section runs; released on drop.
#[derive(Debug)]
pub struct KeyedGuard {
    _guard: OwnedMutexGuard<()>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        locks.retain(|_, weak| weak.strong_count() > 0);
        let fresh = Arc::new(AsyncMutex::new(()));
        locks.insert(key.clone(), Arc::downgrade(&fresh));
        fresh
    }

    pub async fn acquire(&self, key: &K) -> Result<KeyedGuard, DispatchError> {
        let slot = self.slot(key);
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(KeyedGuard { _guard: guard }),
            Err(_) => {
                tracing::warn!(lock = self.name, key = %key, "Lock acquisition timed out");
                Err(DispatchError::ContentionTimeout {
                    key: format!("{}:{}", self.name, key),
                })
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
