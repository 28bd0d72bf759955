//! In-process coordination store
//!
//! Backs the test suite and single-replica development setups. Lock TTLs
//! use the tokio clock so paused-time tests can fast-forward expiry.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CoordinationStore, LOCK_TTL};
use crate::error::GateError;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(entries: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        entries.retain(|_, entry| entry.live(now));
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GateError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Self::prune(&mut entries);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), GateError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let _ = entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, GateError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Self::prune(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        let _ = entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<u64, GateError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Self::prune(&mut entries);
        Ok(u64::from(entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> Result<bool, GateError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Self::prune(&mut entries);
        Ok(entries.contains_key(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, GateError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Self::prune(&mut entries);
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn try_lock(&self, key: &str) -> Result<bool, GateError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        Self::prune(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        let _ = entries.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: Some(Instant::now() + LOCK_TTL),
            },
        );
        Ok(true)
    }

    async fn ping(&self) -> Result<(), GateError> {
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> GateError {
    GateError::Store("memory store mutex poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_nx_writes_only_once() {
        let store = MemoryStore::new();
        assert!(store.set_nx("k", "first").await.unwrap());
        assert!(!store.set_nx("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn keys_with_prefix_filters() {
        let store = MemoryStore::new();
        store.set("ADMITEE_SMOOTH_POD_default_a", "v").await.unwrap();
        store.set("ADMITEE_SMOOTH_POD_default_b", "v").await.unwrap();
        store.set("ADMITEE_SMOOTH_DEL_default_a", "1").await.unwrap();

        let mut keys = store
            .keys_with_prefix("ADMITEE_SMOOTH_POD_default_")
            .await
            .unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "ADMITEE_SMOOTH_POD_default_a".to_string(),
                "ADMITEE_SMOOTH_POD_default_b".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn locks_expire_after_ttl() {
        let store = MemoryStore::new();
        assert!(store.try_lock("LOCK_x").await.unwrap());
        assert!(!store.try_lock("LOCK_x").await.unwrap());

        tokio::time::advance(LOCK_TTL + Duration::from_millis(1)).await;
        assert!(store.try_lock("LOCK_x").await.unwrap());
    }
}
