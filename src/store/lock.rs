//! Distributed lock
//!
//! A lease-based mutual exclusion primitive on top of [`KvStore`]:
//! acquisition is `SET key token NX PX lease`, release is an atomic
//! compare-and-delete on the same token, so a holder whose lease already
//! ran out can never delete somebody else's lock.
//!
//! A [`LockGuard`] that is dropped without an explicit
//! [`release`](LockGuard::release) (early return, panic unwinding, or the
//! owning future being cancelled) schedules the release on the current
//! Tokio runtime. If no runtime is available the lease bounds how long the
//! lock can stay wedged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::{Error, Result};

use super::{KvStore, LOCK_PREFIX};

/// Lock acquisition options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long the lock is held before the store expires it
    pub lease: Duration,

    /// Wait for a held lock instead of failing immediately
    pub blocking: bool,

    /// Upper bound on the wait when blocking (`None` = until acquired)
    pub blocking_timeout: Option<Duration>,

    /// Pause between acquisition attempts while blocking
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(10),
            blocking: true,
            blocking_timeout: Some(Duration::from_secs(10)),
            retry_interval: Duration::from_millis(50),
        }
    }
}

impl LockOptions {
    /// Blocking lock with the given lease, waiting at most `wait`
    pub fn bounded(lease: Duration, wait: Duration) -> Self {
        Self {
            lease,
            blocking_timeout: Some(wait),
            ..Default::default()
        }
    }

    /// Set the lease
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Fail immediately if the lock is held
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    /// Set the blocking timeout
    pub fn blocking_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    /// Set the retry interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// A named lock in a shared store
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    key: String,
    options: LockOptions,
}

impl DistributedLock {
    /// Create a lock handle. `lock::` is prepended to `name` if missing.
    pub fn new(store: Arc<dyn KvStore>, name: &str, options: LockOptions) -> Self {
        let key = if name.starts_with(LOCK_PREFIX) {
            name.to_string()
        } else {
            format!("{LOCK_PREFIX}{name}")
        };

        Self {
            store,
            key,
            options,
        }
    }

    /// The store key backing this lock
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Acquire the lock
    ///
    /// Returns [`Error::LockTimeout`] when the lock is held and either
    /// blocking is disabled or the blocking timeout elapsed. Store failures
    /// propagate as [`Error::Store`].
    pub async fn acquire(&self) -> Result<LockGuard> {
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = self
            .options
            .blocking_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            let acquired = self
                .store
                .set_nx(
                    &self.key,
                    Bytes::from(token.clone()),
                    Some(self.options.lease),
                )
                .await?;

            if acquired {
                tracing::debug!(lock = %self.key, lease_ms = self.options.lease.as_millis() as u64, "Lock acquired");
                return Ok(LockGuard {
                    store: Arc::clone(&self.store),
                    key: self.key.clone(),
                    token,
                    released: false,
                });
            }

            if !self.options.blocking {
                return Err(Error::LockTimeout {
                    key: self.key.clone(),
                });
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!(lock = %self.key, "Lock wait timed out");
                        return Err(Error::LockTimeout {
                            key: self.key.clone(),
                        });
                    }
                    self.options.retry_interval.min(deadline - now)
                }
                None => self.options.retry_interval,
            };

            tokio::time::sleep(pause).await;
        }
    }

    /// Run `f` while holding the lock
    ///
    /// The lock is released after `f` completes, whatever its outcome. A
    /// failed release is logged and does not mask the result of `f`.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire().await?;
        let result = f().await;

        if let Err(e) = guard.release().await {
            tracing::warn!(error = %e, "Failed to release lock, lease will expire it");
        }

        result
    }
}

/// Proof of lock ownership
///
/// Release explicitly with [`release`](Self::release); dropping the guard
/// releases in the background.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    store: Arc<dyn KvStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    /// The store key backing this lock
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock
    ///
    /// Returns `false` if the lease had already expired and the lock was
    /// gone or taken over by another holder.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let released = self
            .store
            .delete_if_eq(&self.key, self.token.as_bytes())
            .await?;

        if released {
            tracing::debug!(lock = %self.key, "Lock released");
        } else {
            tracing::warn!(lock = %self.key, "Lock lease expired before release");
        }

        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.delete_if_eq(&key, token.as_bytes()).await {
                        tracing::warn!(lock = %key, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(lock = %key, "No runtime to release lock, waiting for lease expiry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> Arc<dyn KvStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_lock_key_prefix() {
        let store = store();
        let lock = DistributedLock::new(Arc::clone(&store), "room_of_7", LockOptions::default());
        assert_eq!(lock.key(), "lock::room_of_7");

        let lock = DistributedLock::new(store, "lock::room_of_7", LockOptions::default());
        assert_eq!(lock.key(), "lock::room_of_7");
    }

    #[tokio::test]
    async fn test_exclusive() {
        let store = store();
        let opts = LockOptions::default().non_blocking();
        let a = DistributedLock::new(Arc::clone(&store), "x", opts);
        let b = DistributedLock::new(Arc::clone(&store), "x", opts);

        let guard = a.acquire().await.unwrap();
        let err = b.acquire().await.err().unwrap();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(err.is_retryable());

        assert!(guard.release().await.unwrap());
        let guard = b.acquire().await.unwrap();
        assert!(guard.release().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_waits_for_release() {
        let store = store();
        let holder = DistributedLock::new(Arc::clone(&store), "x", LockOptions::default());
        let guard = holder.acquire().await.unwrap();

        let waiter = DistributedLock::new(
            Arc::clone(&store),
            "x",
            LockOptions::bounded(Duration::from_secs(5), Duration::from_secs(3)),
        );
        let pending = tokio::spawn(async move { waiter.acquire().await.map(|g| g.key().to_string()) });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(guard.release().await.unwrap());

        let key = pending.await.unwrap().unwrap();
        assert_eq!(key, "lock::x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_timeout() {
        let store = store();
        let holder = DistributedLock::new(Arc::clone(&store), "x", LockOptions::default());
        let _guard = holder.acquire().await.unwrap();

        let waiter = DistributedLock::new(
            Arc::clone(&store),
            "x",
            LockOptions::bounded(Duration::from_secs(5), Duration::from_secs(3)),
        );

        let started = Instant::now();
        let err = waiter.acquire().await.err().unwrap();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_and_stale_release() {
        let store = store();
        let opts = LockOptions::default()
            .lease(Duration::from_secs(1))
            .non_blocking();

        let first = DistributedLock::new(Arc::clone(&store), "x", opts)
            .acquire()
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        // The crashed holder's lease ran out, so someone else can take over
        let second = DistributedLock::new(Arc::clone(&store), "x", opts.lease(Duration::from_secs(30)))
            .acquire()
            .await
            .unwrap();

        // The stale holder cannot release the new owner's lock
        assert!(!first.release().await.unwrap());
        assert!(store.get("lock::x").await.unwrap().is_some());

        assert!(second.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let store = store();
        let lock = DistributedLock::new(Arc::clone(&store), "x", LockOptions::default());

        {
            let _guard = lock.acquire().await.unwrap();
            assert!(store.get("lock::x").await.unwrap().is_some());
        }

        // Deferred release runs on the runtime
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get("lock::x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_holder_releases() {
        let store = store();
        let lock = Arc::new(DistributedLock::new(Arc::clone(&store), "x", LockOptions::default()));

        let task = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.scoped(|| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
                .await
            })
        };

        // Let the task take the lock, then cancel it mid-section
        while store.get("lock::x").await.unwrap().is_none() {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get("lock::x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scoped_releases_on_error() {
        let store = store();
        let lock = DistributedLock::new(Arc::clone(&store), "x", LockOptions::default());

        let result: Result<()> = lock
            .scoped(|| async { Err(Error::Source("boom".into())) })
            .await;
        assert!(matches!(result, Err(Error::Source(_))));
        assert!(store.get("lock::x").await.unwrap().is_none());
    }
}
