//! Versioned config store with change notification.
//!
//! Writers publish a whole new value; readers take an `Arc` snapshot that
//! stays valid however long they hold it. Versions only ever increase.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

/// A value together with the version it was published under.
#[derive(Debug)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: Arc<T>,
}

impl<T> Clone for Versioned<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            value: Arc::clone(&self.value),
        }
    }
}

pub struct ConfigStore<T> {
    inner: Arc<ConfigStoreInner<T>>,
}

struct ConfigStoreInner<T> {
    current: RwLock<Versioned<T>>,
    version_tx: watch::Sender<u64>,
}

/// Receives notifications when a [`ConfigStore`] is updated.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

impl<T> ConfigStore<T> {
    /// Create a store holding `initial` as version 0.
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                current: RwLock::new(Versioned {
                    version: 0,
                    value: Arc::new(initial),
                }),
                version_tx,
            }),
        }
    }

    /// Publish a new value and notify watchers. Returns the new version.
    pub fn update(&self, value: T) -> u64 {
        let new_version = {
            let mut current = self.inner.current.write();
            let version = current.version + 1;
            *current = Versioned {
                version,
                value: Arc::new(value),
            };
            version
        };
        let _ = self.inner.version_tx.send(new_version);
        new_version
    }

    pub fn snapshot(&self) -> Versioned<T> {
        self.inner.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.current.read().version
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConfigWatcher {
    /// Wait until the store is updated.
    ///
    /// Returns the new version, or `Err` if the [`ConfigStore`] has been
    /// dropped.
    pub async fn changed(&mut self) -> Result<u64, watch::error::RecvError> {
        self.version_rx.changed().await?;
        Ok(*self.version_rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_are_monotonic_and_snapshots_stable() {
        let store = ConfigStore::new("v0".to_string());
        let before = store.snapshot();
        let mut watcher = store.subscribe();

        assert_eq!(store.update("v1".to_string()), 1);
        assert_eq!(watcher.changed().await.unwrap(), 1);
        assert_eq!(store.update("v2".to_string()), 2);

        assert_eq!(before.version, 0);
        assert_eq!(before.value.as_str(), "v0");
        let now = store.snapshot();
        assert_eq!(now.version, 2);
        assert_eq!(now.value.as_str(), "v2");
    }
}
