//! Key-value store adapter
//!
//! Everything the coordinator persists goes through the [`KvStore`] trait:
//! plain values with optional expiry, conditional writes, prefix scans and
//! the compare-and-delete primitive the distributed lock is built on.
//!
//! # Architecture
//!
//! ```text
//!   ServiceRegistry   MetadataStore   PermissionCache   NonceGuard
//!          │                │                │               │
//!          └────────────────┴───────┬────────┴───────────────┘
//!                                   ▼
//!                          Arc<dyn KvStore>
//!                     ┌─────────────┴─────────────┐
//!                     ▼                           ▼
//!                RedisStore                  MemoryStore
//!        (pooled ConnectionManager)     (RwLock<BTreeMap>, deadlines)
//! ```
//!
//! Connections are checked out per operation and returned on drop, so a
//! failing or cancelled call never leaks a pool slot.

pub mod error;
pub mod lock;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::{StoreError, StoreResult};
pub use lock::{DistributedLock, LockGuard, LockOptions};
pub use memory::MemoryStore;
pub use redis_store::{PooledConnection, RedisStore};

/// Prefix shared by every lock key
pub const LOCK_PREFIX: &str = "lock::";

/// Networked key-value store with expiring keys
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Write a value unconditionally, replacing any previous value and expiry
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Write only if the key is present. Returns whether the write happened.
    async fn set_xx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Delete a key. Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key only if it currently holds `expected`, atomically
    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> StoreResult<bool>;

    /// List live keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
