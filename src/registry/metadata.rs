//! Metadata slots
//!
//! Named key/value slots living next to the registry entries of a category
//! (`{namespace}:{category}::metadata::{name}`). They hold cross-cutting
//! state that is not a service record, such as room assignments. Slots
//! never expire unless a TTL is requested, and every operation can be
//! wrapped in a short per-slot lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::store::{DistributedLock, KvStore, LockOptions};

use super::config::MetadataConfig;
use super::key::{validate_segment, Keyspace};

/// Per-operation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataOptions {
    /// Wrap the operation in the slot lock
    pub lock: bool,

    /// Expiry for writes (`None` = persistent)
    pub ttl: Option<Duration>,
}

impl MetadataOptions {
    /// Unlocked, persistent
    pub fn plain() -> Self {
        Self::default()
    }

    /// Locked, persistent
    pub fn locked() -> Self {
        Self {
            lock: true,
            ttl: None,
        }
    }

    /// Set the write expiry
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Namespaced metadata slots
pub struct MetadataStore {
    store: Arc<dyn KvStore>,
    keys: Keyspace,
    config: MetadataConfig,
}

impl MetadataStore {
    /// Create a metadata store over `keys`
    pub fn new(store: Arc<dyn KvStore>, keys: Keyspace, config: MetadataConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    /// Store key of a slot
    pub fn key(&self, category: &str, name: &str) -> String {
        self.keys.metadata_key(category, name)
    }

    async fn guarded<F, Fut, T>(&self, category: &str, name: &str, lock: bool, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        validate_segment("category", category)?;
        validate_segment("metadata name", name)?;

        if !lock {
            return f().await;
        }

        let lock = DistributedLock::new(
            Arc::clone(&self.store),
            &self.keys.metadata_lock_key(category, name),
            LockOptions::bounded(self.config.lock_lease, self.config.lock_wait),
        );
        lock.scoped(f).await
    }

    /// Write raw bytes into a slot
    pub async fn set_raw(
        &self,
        category: &str,
        name: &str,
        payload: Bytes,
        options: MetadataOptions,
    ) -> Result<()> {
        let key = self.key(category, name);
        self.guarded(category, name, options.lock, || async {
            self.store.set(&key, payload, options.ttl).await?;
            Ok::<_, Error>(())
        })
        .await?;

        tracing::debug!(key = %key, locked = options.lock, "Metadata written");
        Ok(())
    }

    /// Read raw bytes from a slot
    pub async fn get_raw(
        &self,
        category: &str,
        name: &str,
        options: MetadataOptions,
    ) -> Result<Option<Bytes>> {
        let key = self.key(category, name);
        self.guarded(category, name, options.lock, || async {
            Ok::<_, Error>(self.store.get(&key).await?)
        })
        .await
    }

    /// Delete a slot. Returns whether it existed.
    pub async fn delete(&self, category: &str, name: &str, options: MetadataOptions) -> Result<bool> {
        let key = self.key(category, name);
        let removed = self
            .guarded(category, name, options.lock, || async {
                Ok::<_, Error>(self.store.delete(&key).await?)
            })
            .await?;

        if removed {
            tracing::debug!(key = %key, "Metadata deleted");
        }
        Ok(removed)
    }

    /// Write a JSON-encoded value into a slot
    pub async fn set<T>(&self, category: &str, name: &str, value: &T, options: MetadataOptions) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_vec(value).map_err(|e| Error::codec(self.key(category, name), e))?;
        self.set_raw(category, name, Bytes::from(payload), options).await
    }

    /// Read a JSON-encoded value from a slot
    pub async fn get<T>(&self, category: &str, name: &str, options: MetadataOptions) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_raw(category, name, options).await? {
            Some(payload) => {
                let value = serde_json::from_slice(&payload)
                    .map_err(|e| Error::codec(self.key(category, name), e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}
