//! In-process store
//!
//! A [`KvStore`] backed by an ordered map with per-key deadlines. Used by
//! the test suite and by single-node deployments that do not need Redis.
//! Deadlines use `tokio::time::Instant`, so paused-clock tests can drive
//! expiry with `tokio::time::advance`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::ConfigError;

use super::error::StoreResult;
use super::KvStore;

struct Slot {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-memory key-value store with expiring keys
///
/// Keys are kept ordered, so prefix scans return lexicographic order.
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<BTreeMap<String, Slot>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired key. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| slot.is_live(now));
        let removed = before - slots.len();

        if removed > 0 {
            tracing::debug!(removed = removed, "Purged expired keys");
        }

        removed
    }

    /// Spawn background purge task
    ///
    /// Expired keys are already invisible to reads; the task only reclaims
    /// memory. Returns a handle that can be used to abort the task. A zero
    /// interval is rejected.
    pub fn spawn_purge_task(
        self: &Arc<Self>,
        interval: Duration,
    ) -> Result<tokio::task::JoinHandle<()>, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Zero("purge interval"));
        }

        let store = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.purge_expired().await;
            }
        }))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let now = Instant::now();
        let slots = self.slots.read().await;

        Ok(slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        self.slots
            .write()
            .await
            .insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;

        if slots.get(key).is_some_and(|slot| slot.is_live(now)) {
            return Ok(false);
        }

        slots.insert(key.to_string(), Slot::new(value, ttl));
        Ok(true)
    }

    async fn set_xx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;

        match slots.get_mut(key) {
            Some(slot) if slot.is_live(now) => {
                *slot = Slot::new(value, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let removed = self.slots.write().await.remove(key);
        Ok(removed.is_some_and(|slot| slot.is_live(now)))
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;

        let matches = slots
            .get(key)
            .is_some_and(|slot| slot.is_live(now) && slot.value.as_ref() == expected);

        if matches {
            slots.remove(key);
        }

        Ok(matches)
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let slots = self.slots.read().await;

        Ok(slots
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, slot)| slot.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
