//! Room allocator
//!
//! Binds a chat channel to the media service hosting its room. The first
//! caller for a channel picks the least-loaded qualifying service and
//! persists the choice; every later caller gets the same service back.
//! The decision runs under a per-channel distributed lock so concurrent
//! first callers cannot bind the channel to two different services.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::{MetadataOptions, MetadataStore, ServiceInfo, ServiceRegistry};
use crate::stats::{AllocatorCounters, AllocatorStats};
use crate::store::{DistributedLock, KvStore, LockOptions};

use super::config::AllocatorConfig;
use super::liveness::LivenessCheck;

/// Metadata slot (and lock name) holding a channel's assignment
pub fn room_slot(channel_id: u64) -> String {
    format!("room_of_{}", channel_id)
}

/// Channel to media service allocator
pub struct RoomAllocator {
    store: Arc<dyn KvStore>,
    registry: Arc<ServiceRegistry>,
    metadata: MetadataStore,
    config: AllocatorConfig,
    liveness: Option<Arc<dyn LivenessCheck>>,
    stats: AllocatorCounters,
}

impl RoomAllocator {
    /// Create an allocator over a registry and its metadata slots
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: Arc<ServiceRegistry>,
        metadata: MetadataStore,
        config: AllocatorConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            registry,
            metadata,
            config,
            liveness: None,
            stats: AllocatorCounters::default(),
        })
    }

    /// Confirm existing assignments with `check` before returning them
    pub fn with_liveness(mut self, check: Arc<dyn LivenessCheck>) -> Self {
        self.liveness = Some(check);
        self
    }

    /// Get the allocator configuration
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Get allocator statistics
    pub fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }

    fn channel_lock(&self, channel_id: u64) -> DistributedLock {
        DistributedLock::new(
            Arc::clone(&self.store),
            &room_slot(channel_id),
            LockOptions::bounded(self.config.lock_lease, self.config.lock_wait),
        )
    }

    /// Current assignment of a channel, without allocating
    pub async fn assignment(&self, channel_id: u64) -> Result<Option<ServiceInfo>> {
        let slot = room_slot(channel_id);
        let key = self.metadata.key(&self.config.category, &slot);

        match self
            .metadata
            .get_raw(&self.config.category, &slot, MetadataOptions::plain())
            .await?
        {
            Some(payload) => Ok(Some(ServiceInfo::decode(&key, &payload)?)),
            None => Ok(None),
        }
    }

    /// Return the service hosting `channel_id`, allocating one if needed
    ///
    /// Returns `None` when no qualifying service is registered. Failing to
    /// get the channel lock in time yields a retryable
    /// [`Error::LockTimeout`].
    pub async fn get_or_allocate(
        &self,
        channel_id: u64,
        tags: Option<&BTreeSet<String>>,
    ) -> Result<Option<ServiceInfo>> {
        if let Some(tags) = tags {
            crate::registry::validate_tags(tags)?;
        }

        self.channel_lock(channel_id)
            .scoped(|| self.allocate_locked(channel_id, tags))
            .await
    }

    async fn allocate_locked(
        &self,
        channel_id: u64,
        tags: Option<&BTreeSet<String>>,
    ) -> Result<Option<ServiceInfo>> {
        let category = self.config.category.as_str();
        let slot = room_slot(channel_id);

        let stale = match self.assignment(channel_id).await {
            Ok(Some(existing)) => {
                if self.is_live(&existing).await? {
                    self.stats.reused();
                    tracing::debug!(
                        channel_id = channel_id,
                        service_id = %existing.id,
                        "Room assignment reused"
                    );
                    return Ok(Some(existing));
                }

                tracing::info!(
                    channel_id = channel_id,
                    service_id = %existing.id,
                    "Bound service is gone, reallocating room"
                );
                true
            }
            Ok(None) => false,
            Err(Error::Codec { key, reason }) => {
                tracing::warn!(key = %key, reason = %reason, "Corrupt room assignment, reallocating");
                true
            }
            Err(e) => return Err(e),
        };

        if stale {
            self.stats.evicted();
        }

        let selected = match self.registry.find(category, tags).await? {
            Some(selected) => selected,
            None => {
                if stale {
                    self.metadata
                        .delete(category, &slot, MetadataOptions::plain())
                        .await?;
                }
                self.stats.no_capacity();
                tracing::warn!(channel_id = channel_id, category = %category, "No capacity for room");
                return Ok(None);
            }
        };

        // The channel lock serializes writers, so a plain write is enough
        self.metadata
            .set_raw(category, &slot, selected.encode()?, MetadataOptions::plain())
            .await?;

        self.stats.allocated();
        tracing::info!(
            channel_id = channel_id,
            service_id = %selected.id,
            load_factor = selected.load_factor,
            "Room allocated"
        );

        Ok(Some(selected))
    }

    async fn is_live(&self, service: &ServiceInfo) -> Result<bool> {
        match &self.liveness {
            Some(check) => check.is_live(&self.config.category, service).await,
            None => Ok(true),
        }
    }

    /// Drop a channel's assignment. Returns whether one existed.
    pub async fn deallocate(&self, channel_id: u64) -> Result<bool> {
        let category = self.config.category.as_str();
        let slot = room_slot(channel_id);

        let removed = if self.config.lock_deallocate {
            self.channel_lock(channel_id)
                .scoped(|| self.metadata.delete(category, &slot, MetadataOptions::plain()))
                .await?
        } else {
            self.metadata
                .delete(category, &slot, MetadataOptions::plain())
                .await?
        };

        if removed {
            self.stats.deallocated();
            tracing::info!(channel_id = channel_id, "Room deallocated");
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Keyspace, MetadataConfig, NetworkAddress};
    use crate::room::RegistryLiveness;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Counts unconditional writes to room slots
    struct CountingStore {
        inner: MemoryStore,
        room_writes: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for CountingStore {
        async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
            if key.contains("::metadata::room_of_") {
                self.room_writes.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.set(key, value, ttl).await
        }

        async fn set_nx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool> {
            self.inner.set_nx(key, value, ttl).await
        }

        async fn set_xx(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool> {
            self.inner.set_xx(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key).await
        }

        async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
            self.inner.delete_if_eq(key, expected).await
        }

        async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
            self.inner.keys(prefix).await
        }
    }

    fn service(id: &str, load_factor: f64) -> ServiceInfo {
        ServiceInfo::new(id, NetworkAddress::new("10.0.0.1".parse().unwrap(), 7000), load_factor)
    }

    fn allocator_with(store: Arc<dyn KvStore>, config: AllocatorConfig) -> (Arc<ServiceRegistry>, RoomAllocator) {
        let registry = Arc::new(ServiceRegistry::new(Arc::clone(&store)));
        let metadata = MetadataStore::new(
            Arc::clone(&store),
            Keyspace::new("services"),
            MetadataConfig::default(),
        );
        let allocator = RoomAllocator::new(store, Arc::clone(&registry), metadata, config).unwrap();
        (registry, allocator)
    }

    fn allocator() -> (Arc<MemoryStore>, Arc<ServiceRegistry>, RoomAllocator) {
        let store = Arc::new(MemoryStore::new());
        let (registry, allocator) = allocator_with(store.clone(), AllocatorConfig::default());
        (store, registry, allocator)
    }

    #[tokio::test]
    async fn test_allocation_is_sticky() {
        let (store, registry, allocator) = allocator();
        registry.register("media", &service("m1", 0.5)).await.unwrap();
        registry.register("media", &service("m2", 0.2)).await.unwrap();

        let first = allocator.get_or_allocate(42, None).await.unwrap().unwrap();
        assert_eq!(first.id, "m2");
        assert!(store
            .get("services:media::metadata::room_of_42")
            .await
            .unwrap()
            .is_some());

        // A now less-loaded service does not move the room
        registry.register("media", &service("m3", 0.0)).await.unwrap();
        let second = allocator.get_or_allocate(42, None).await.unwrap().unwrap();
        assert_eq!(second, first);

        let stats = allocator.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);

        // Lock is released afterwards
        assert!(store.get("lock::room_of_42").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_agree() {
        let store = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            room_writes: AtomicUsize::new(0),
        });
        let (registry, allocator) = allocator_with(store.clone(), AllocatorConfig::default());
        registry.register("media", &service("m1", 0.3)).await.unwrap();
        registry.register("media", &service("m2", 0.1)).await.unwrap();

        let allocator = Arc::new(allocator);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move {
                allocator.get_or_allocate(7, None).await
            }));
        }

        let mut chosen = Vec::new();
        for handle in handles {
            chosen.push(handle.await.unwrap().unwrap().unwrap().id);
        }

        assert!(chosen.iter().all(|id| id == "m2"));
        assert_eq!(store.room_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deallocate_then_fresh_pick() {
        let (_, registry, allocator) = allocator();
        registry.register("media", &service("m1", 0.5)).await.unwrap();

        assert_eq!(allocator.get_or_allocate(1, None).await.unwrap().unwrap().id, "m1");

        registry.register("media", &service("m2", 0.1)).await.unwrap();
        assert!(allocator.deallocate(1).await.unwrap());
        assert!(!allocator.deallocate(1).await.unwrap());
        assert_eq!(allocator.assignment(1).await.unwrap(), None);

        assert_eq!(allocator.get_or_allocate(1, None).await.unwrap().unwrap().id, "m2");
        assert_eq!(allocator.stats().deallocations, 1);
    }

    #[tokio::test]
    async fn test_no_capacity() {
        let (store, registry, allocator) = allocator();

        assert_eq!(allocator.get_or_allocate(9, None).await.unwrap(), None);

        // Only a service with tags outside the request
        registry
            .register("media", &service("m1", 0.1).with_tag("gpu"))
            .await
            .unwrap();
        let tags: BTreeSet<String> = ["eu".to_string()].into_iter().collect();
        assert_eq!(allocator.get_or_allocate(9, Some(&tags)).await.unwrap(), None);

        assert!(store
            .get("services:media::metadata::room_of_9")
            .await
            .unwrap()
            .is_none());
        assert_eq!(allocator.stats().no_capacity, 2);
    }

    #[tokio::test]
    async fn test_dead_service_is_evicted() {
        let store = Arc::new(MemoryStore::new());
        let (registry, allocator) = allocator_with(store.clone(), AllocatorConfig::default());
        let allocator = allocator.with_liveness(Arc::new(RegistryLiveness::new(Arc::clone(&registry))));

        registry.register("media", &service("m1", 0.1)).await.unwrap();
        registry.register("media", &service("m2", 0.4)).await.unwrap();
        assert_eq!(allocator.get_or_allocate(3, None).await.unwrap().unwrap().id, "m1");

        registry.remove("media", "m1").await.unwrap();
        assert_eq!(allocator.get_or_allocate(3, None).await.unwrap().unwrap().id, "m2");
        assert_eq!(allocator.assignment(3).await.unwrap().unwrap().id, "m2");

        // Nothing left: stale assignment is dropped
        registry.remove("media", "m2").await.unwrap();
        assert_eq!(allocator.get_or_allocate(3, None).await.unwrap(), None);
        assert_eq!(allocator.assignment(3).await.unwrap(), None);

        assert_eq!(allocator.stats().evictions, 2);
    }

    #[tokio::test]
    async fn test_without_liveness_dead_service_is_kept() {
        let (_, registry, allocator) = allocator();
        registry.register("media", &service("m1", 0.1)).await.unwrap();
        allocator.get_or_allocate(3, None).await.unwrap();

        registry.remove("media", "m1").await.unwrap();
        assert_eq!(allocator.get_or_allocate(3, None).await.unwrap().unwrap().id, "m1");
    }

    #[tokio::test]
    async fn test_corrupt_assignment_is_replaced() {
        let (store, registry, allocator) = allocator();
        registry.register("media", &service("m1", 0.1)).await.unwrap();
        store
            .set("services:media::metadata::room_of_5", Bytes::from_static(b"garbage"), None)
            .await
            .unwrap();

        assert!(allocator.assignment(5).await.is_err());
        assert_eq!(allocator.get_or_allocate(5, None).await.unwrap().unwrap().id, "m1");
        assert_eq!(allocator.assignment(5).await.unwrap().unwrap().id, "m1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_is_retryable() {
        let (store, registry, allocator) = allocator();
        registry.register("media", &service("m1", 0.1)).await.unwrap();
        store
            .set("lock::room_of_11", Bytes::from_static(b"other"), Some(Duration::from_secs(30)))
            .await
            .unwrap();

        let err = assert_err!(allocator.get_or_allocate(11, None).await);
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(allocator.assignment(11).await.unwrap(), None);

        // Unlocked deallocate by default
        assert_ok!(allocator.deallocate(11).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_deallocate() {
        let store = Arc::new(MemoryStore::new());
        let (registry, allocator) =
            allocator_with(store.clone(), AllocatorConfig::default().lock_deallocate(true));
        registry.register("media", &service("m1", 0.1)).await.unwrap();
        allocator.get_or_allocate(12, None).await.unwrap();

        store
            .set("lock::room_of_12", Bytes::from_static(b"other"), Some(Duration::from_secs(30)))
            .await
            .unwrap();
        let err = assert_err!(allocator.deallocate(12).await);
        assert!(matches!(err, Error::LockTimeout { .. }));

        store.delete("lock::room_of_12").await.unwrap();
        assert!(assert_ok!(allocator.deallocate(12).await));
    }

    /// Takes its time and always reports the service dead
    struct SlowLiveness(Duration);

    #[async_trait]
    impl LivenessCheck for SlowLiveness {
        async fn is_live(&self, _category: &str, _service: &ServiceInfo) -> Result<bool> {
            tokio::time::sleep(self.0).await;
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_outlasts_slow_section() {
        let store = Arc::new(MemoryStore::new());
        let (registry, allocator) = allocator_with(store.clone(), AllocatorConfig::default());
        registry.register("media", &service("m1", 0.1)).await.unwrap();
        allocator.get_or_allocate(20, None).await.unwrap();

        // Section runs past the wait budget but stays inside the lease
        let allocator = allocator.with_liveness(Arc::new(SlowLiveness(Duration::from_secs(5))));
        let (first, second) = tokio::join!(
            allocator.get_or_allocate(20, None),
            allocator.get_or_allocate(20, None),
        );

        assert_eq!(first.unwrap().unwrap().id, "m1");
        assert!(matches!(second, Err(Error::LockTimeout { .. })));
        assert_eq!(allocator.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_rejects_malformed_tags() {
        let (_, _, allocator) = allocator();
        let tags: BTreeSet<String> = ["".to_string()].into_iter().collect();
        let err = allocator.get_or_allocate(1, Some(&tags)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
