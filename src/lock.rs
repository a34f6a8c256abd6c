//! Short-lived mutual exclusion across processes, built on `set_if_absent`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::store::{KeyValueStore, StoreError};

/// A TTL-bounded lock stored under one key.
///
/// The TTL only bounds how long a crashed holder can block everyone else;
/// holders release explicitly through [`LockGuard::release`].
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `Ok(None)` when another holder has the lock.
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>, StoreError> {
        let token = Uuid::new_v4().to_string();
        if self.store.set_if_absent(&self.key, &token, self.ttl).await? {
            trace!(key = %self.key, "Lock acquired");
            Ok(Some(LockGuard {
                store: self.store.clone(),
                key: self.key.clone(),
                token,
                released: false,
            }))
        } else {
            trace!(key = %self.key, "Lock contended");
            Ok(None)
        }
    }
}

/// Proof of holding a [`DistributedLock`].
///
/// Dropping an unreleased guard schedules the release on the current tokio
/// runtime, so early returns and panics do not leave the lock to its TTL.
#[must_use = "the lock is released when the guard is released or dropped"]
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deletes the lock if this guard still owns it. Never fails: an expired
    /// or unreachable lock is logged and left to its TTL.
    pub async fn release(mut self) {
        self.released = true;
        release_owned(self.store.as_ref(), &self.key, &self.token).await;
    }
}

async fn release_owned(store: &dyn KeyValueStore, key: &str, token: &str) {
    match store.delete_if_equals(key, token).await {
        Ok(true) => trace!(key = %key, "Lock released"),
        Ok(false) => debug!(key = %key, "Lock expired before release"),
        Err(err) => warn!(key = %key, error = %err, "Failed to release lock, leaving it to expire"),
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_owned(store.as_ref(), &key, &token).await;
                });
            }
            Err(_) => warn!(key = %key, "Lock guard dropped outside a runtime, leaving it to expire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, DistributedLock) {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1_000)));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let lock = DistributedLock::new(store.clone(), "ns:lock", Duration::from_secs(70));
        (store, clock, lock)
    }

    #[tokio::test]
    async fn test_second_acquire_is_contended() {
        let (_, _, lock) = setup();
        let guard = lock.try_acquire().await.unwrap().expect("first acquire wins");
        assert!(lock.try_acquire().await.unwrap().is_none());

        guard.release().await;
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_bounds_a_crashed_holder() {
        let (_, clock, lock) = setup();
        let guard = lock.try_acquire().await.unwrap().unwrap();
        // Simulate a crash: the guard never runs its release.
        std::mem::forget(guard);

        assert!(lock.try_acquire().await.unwrap().is_none());
        clock.advance(Duration::from_secs(70));
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_release_keeps_new_holder() {
        let (store, clock, lock) = setup();
        let stale = lock.try_acquire().await.unwrap().unwrap();

        clock.advance(Duration::from_secs(71));
        let _fresh = lock.try_acquire().await.unwrap().unwrap();

        stale.release().await;
        assert!(store.get("ns:lock").await.unwrap().is_some());
        assert!(lock.try_acquire().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let (store, _, lock) = setup();
        {
            let _guard = lock.try_acquire().await.unwrap().unwrap();
        }
        // Let the spawned release run.
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(store.get("ns:lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_an_error_not_contention() {
        let (store, _, lock) = setup();
        store.set_available(false);
        assert!(lock.try_acquire().await.is_err());
    }
}
