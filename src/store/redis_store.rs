//! Redis-backed store
//!
//! One multiplexed [`ConnectionManager`] is shared by the whole process.
//! Concurrency is bounded by a pool of checkout permits: every command
//! checks out a [`PooledConnection`], and the permit is returned when the
//! guard is dropped, whether the command succeeded, failed, or the calling
//! future was cancelled.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::StoreConfig;

use super::error::{StoreError, StoreResult};
use super::KvStore;

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 256;

/// Atomic compare-and-delete used to release locks
const DELETE_IF_EQ_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// A connection checked out of the shared pool
///
/// Dereferences to the underlying [`ConnectionManager`]. Dropping the guard
/// returns the slot to the pool.
pub struct PooledConnection {
    conn: ConnectionManager,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Redis implementation of [`KvStore`]
pub struct RedisStore {
    manager: ConnectionManager,
    permits: Arc<Semaphore>,
    checkout_timeout: Duration,
    release_script: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and build the shared pool
    ///
    /// Fails with [`StoreError::Unavailable`] if the server cannot be reached.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;

        tracing::info!(
            url = %redact_url(&config.url),
            pool_size = config.pool_size,
            "Connected to Redis"
        );

        Ok(Self {
            manager,
            permits: Arc::new(Semaphore::new(config.pool_size)),
            checkout_timeout: config.checkout_timeout,
            release_script: redis::Script::new(DELETE_IF_EQ_SCRIPT),
        })
    }

    /// Check a connection out of the pool
    ///
    /// Waits at most `checkout_timeout` for a free slot.
    pub async fn checkout(&self) -> StoreResult<PooledConnection> {
        let permit = tokio::time::timeout(
            self.checkout_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| StoreError::Unavailable("connection pool exhausted".into()))?
        .map_err(|_| StoreError::Unavailable("connection pool closed".into()))?;

        Ok(PooledConnection {
            conn: self.manager.clone(),
            _permit: permit,
        })
    }

    /// Number of connections currently free in the pool
    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    /// Close the pool. Later checkouts fail with `Unavailable`.
    pub fn close(&self) {
        self.permits.close();
    }
}

fn set_cmd(key: &str, value: &[u8], ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Turn a literal key prefix into a SCAN MATCH pattern
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Strip credentials from a connection URL before logging it
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let mut conn = self.checkout().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.checkout().await?;
        let _: () = set_cmd(key, &value, ttl).query_async(&mut *conn).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut conn = self.checkout().await?;
        let mut cmd = set_cmd(key, &value, ttl);
        cmd.arg("NX");
        let reply: Option<String> = cmd.query_async(&mut *conn).await?;
        Ok(reply.is_some())
    }

    async fn set_xx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut conn = self.checkout().await?;
        let mut cmd = set_cmd(key, &value, ttl);
        cmd.arg("XX");
        let reply: Option<String> = cmd.query_async(&mut *conn).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.checkout().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut *conn).await?;
        Ok(removed > 0)
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        let mut conn = self.checkout().await?;
        let removed: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.checkout().await?;
        let pattern = scan_pattern(prefix);

        // SCAN may return a key more than once across rounds
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut *conn)
                .await?;

            for key in batch {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}
