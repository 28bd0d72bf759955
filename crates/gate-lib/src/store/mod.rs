//! Coordination store abstraction
//!
//! A shared key-value store stands in for a consensus primitive: drain
//! records, approval markers and TTL-bounded locks all live here so every
//! gate replica observes the same state.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::GateError;

/// TTL on every mutual-exclusion lock; bounds the damage of a crashed holder.
pub const LOCK_TTL: Duration = Duration::from_secs(10);

const LOCK_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const LOCK_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, GateError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), GateError>;

    /// Set only if absent; returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, GateError>;

    /// Returns the number of keys removed.
    async fn delete(&self, key: &str) -> Result<u64, GateError>;

    async fn exists(&self, key: &str) -> Result<bool, GateError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, GateError>;

    /// One lock attempt: set-if-absent with [`LOCK_TTL`].
    async fn try_lock(&self, key: &str) -> Result<bool, GateError>;

    async fn ping(&self) -> Result<(), GateError>;
}

/// A held mutual-exclusion lock. Release is explicit; an unreleased lock
/// falls off on its own once the TTL lapses.
#[must_use = "an unreleased lock blocks other replicas until the TTL lapses"]
pub struct Lock {
    key: String,
}

impl Lock {
    /// Acquire with exponential backoff. The wait is bounded in practice by
    /// the lock TTL, so a crashed holder cannot wedge acquisition forever.
    pub async fn acquire(store: &dyn CoordinationStore, key: &str) -> Result<Self, GateError> {
        let mut backoff = LOCK_BACKOFF_INITIAL;
        loop {
            if store.try_lock(key).await? {
                return Ok(Self {
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(LOCK_BACKOFF_MAX);
        }
    }

    pub async fn release(self, store: &dyn CoordinationStore) {
        match store.delete(&self.key).await {
            Ok(1) => {}
            Ok(removed) => warn!(key = %self.key, removed, "lock was not held at release"),
            Err(error) => warn!(key = %self.key, %error, "lock release failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_acquire_waits_for_release() {
        let store = MemoryStore::new();
        let held = Lock::acquire(&store, "LOCK_ReplicaSet_default_web").await.unwrap();
        assert!(!store.try_lock("LOCK_ReplicaSet_default_web").await.unwrap());
        held.release(&store).await;
        assert!(store.try_lock("LOCK_ReplicaSet_default_web").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_acquire_survives_crashed_holder_via_ttl() {
        let store = MemoryStore::new();
        // Simulate a holder that never releases.
        assert!(store.try_lock("LOCK_DaemonSet_default_agent").await.unwrap());

        let acquired = Lock::acquire(&store, "LOCK_DaemonSet_default_agent");
        // The paused clock advances through the backoff sleeps; the TTL
        // expires after 10 seconds and acquisition succeeds.
        let lock = tokio::time::timeout(Duration::from_secs(30), acquired)
            .await
            .expect("acquisition should finish once the TTL lapsed")
            .unwrap();
        lock.release(&store).await;
    }
}
