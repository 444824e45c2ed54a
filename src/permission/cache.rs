//! Look-aside permission cache
//!
//! A principal's effective permissions (direct grants plus every joined
//! group's grants) are computed from the [`PermissionSource`] on a miss
//! and cached as a JSON array under `USER-PERMISSION::{uid}` with a TTL.
//! Writers invalidate on change; the TTL bounds staleness when an
//! invalidation is lost.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::stats::{CacheCounters, CacheStats};
use crate::store::KvStore;

use super::config::PermissionCacheConfig;
use super::source::PermissionSource;

/// Prefix of permission cache keys
pub const PERMISSION_PREFIX: &str = "USER-PERMISSION::";

/// Cache key of a principal
pub fn permission_key(uid: u64) -> String {
    format!("{}{}", PERMISSION_PREFIX, uid)
}

/// Cached view of principal permissions
pub struct PermissionCache {
    store: Arc<dyn KvStore>,
    source: Arc<dyn PermissionSource>,
    config: PermissionCacheConfig,
    stats: CacheCounters,
}

impl PermissionCache {
    /// Create a cache in front of `source`
    pub fn new(
        store: Arc<dyn KvStore>,
        source: Arc<dyn PermissionSource>,
        config: PermissionCacheConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            source,
            config,
            stats: CacheCounters::default(),
        })
    }

    /// Get the cache configuration
    pub fn config(&self) -> &PermissionCacheConfig {
        &self.config
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Effective permissions of `uid`
    ///
    /// Unknown principals and principals without permissions yield an
    /// empty set, which is never cached.
    pub async fn get_cached(&self, uid: u64) -> Result<BTreeSet<String>> {
        let key = permission_key(uid);

        if let Some(payload) = self.store.get(&key).await? {
            match serde_json::from_slice::<BTreeSet<String>>(&payload) {
                Ok(permissions) if !permissions.is_empty() => {
                    self.stats.hit();
                    return Ok(permissions);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Corrupt permission cache entry, recomputing");
                }
            }
        }

        self.stats.miss();

        let permissions = match self.source.principal(uid).await? {
            Some(record) => record.effective_permissions(),
            None => BTreeSet::new(),
        };

        if permissions.is_empty() {
            tracing::debug!(uid = uid, "No permissions, not caching");
            return Ok(permissions);
        }

        let payload = serde_json::to_vec(&permissions).map_err(|e| Error::codec(&key, e))?;
        // SET replaces value and expiry in one step
        self.store
            .set(&key, Bytes::from(payload), Some(self.config.ttl))
            .await?;

        self.stats.filled();
        tracing::debug!(uid = uid, count = permissions.len(), "Permissions cached");

        Ok(permissions)
    }

    /// Drop the cached permissions of `uid`
    pub async fn invalidate(&self, uid: u64) -> Result<()> {
        let existed = self.store.delete(&permission_key(uid)).await?;
        self.stats.invalidated();
        tracing::debug!(uid = uid, existed = existed, "Permissions invalidated");
        Ok(())
    }

    /// Whether `uid` holds every permission in `required`
    ///
    /// Holding the configured super permission satisfies any requirement.
    pub async fn has_permissions<I, S>(&self, uid: u64, required: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let held = self.get_cached(uid).await?;

        if let Some(super_permission) = &self.config.super_permission {
            if held.contains(super_permission) {
                return Ok(true);
            }
        }

        Ok(required
            .into_iter()
            .all(|permission| held.contains(permission.as_ref())))
    }
}
