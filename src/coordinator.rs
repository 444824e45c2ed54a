//! Coordinator facade
//!
//! Wires the registry, room allocator, permission cache and nonce guard
//! to one shared store and exposes the operations the transport layer
//! calls after authenticating a request.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::nonce::NonceGuard;
use crate::permission::{PermissionCache, PermissionSource};
use crate::registry::{MetadataStore, ServiceInfo, ServiceRegistry};
use crate::room::{RegistryLiveness, RoomAllocator};
use crate::stats::CoordinatorStats;
use crate::store::{KvStore, RedisStore};

/// Entry point for every coordination operation
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<ServiceRegistry>,
    allocator: RoomAllocator,
    permissions: PermissionCache,
    nonces: NonceGuard,
    redis: Option<Arc<RedisStore>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Connect to Redis and build every component
    pub async fn connect(
        config: CoordinatorConfig,
        source: Arc<dyn PermissionSource>,
    ) -> Result<Self> {
        config.validate()?;

        let redis = Arc::new(RedisStore::connect(&config.store).await?);
        let mut coordinator = Self::with_store(config, redis.clone(), source)?;
        coordinator.redis = Some(redis);

        Ok(coordinator)
    }

    /// Build every component on top of an existing store
    pub fn with_store(
        config: CoordinatorConfig,
        store: Arc<dyn KvStore>,
        source: Arc<dyn PermissionSource>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ServiceRegistry::with_config(
            Arc::clone(&store),
            config.registry.clone(),
        )?);
        let metadata = MetadataStore::new(
            Arc::clone(&store),
            registry.keyspace().clone(),
            config.metadata,
        );
        let mut allocator = RoomAllocator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            metadata,
            config.allocator.clone(),
        )?;
        if config.allocator.check_liveness {
            allocator =
                allocator.with_liveness(Arc::new(RegistryLiveness::new(Arc::clone(&registry))));
        }
        let permissions =
            PermissionCache::new(Arc::clone(&store), source, config.permissions.clone())?;
        let nonces = NonceGuard::new(store, config.nonce.clone())?;

        tracing::info!(
            namespace = %config.registry.namespace,
            room_category = %config.allocator.category,
            "Coordinator ready"
        );

        Ok(Self {
            config,
            registry,
            allocator,
            permissions,
            nonces,
            redis: None,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get a reference to the service registry
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Register `info` under `service_id`, replacing any previous record
    pub async fn register(&self, category: &str, service_id: &str, mut info: ServiceInfo) -> Result<()> {
        info.id = service_id.to_string();
        self.registry.register(category, &info).await
    }

    /// Least-loaded service of `category` whose tags fit `tags`
    pub async fn find(
        &self,
        category: &str,
        tags: Option<&BTreeSet<String>>,
    ) -> Result<Option<ServiceInfo>> {
        self.registry.find(category, tags).await
    }

    /// Extend a registration. Returns `false` if it already expired.
    pub async fn refresh(&self, category: &str, service_id: &str) -> Result<bool> {
        self.registry.refresh(category, service_id).await
    }

    /// Remove a registration
    pub async fn remove(&self, category: &str, service_id: &str) -> Result<bool> {
        self.registry.remove(category, service_id).await
    }

    /// Keep `info` registered from a background task until shutdown
    ///
    /// Fails without spawning anything if the interval is zero or not
    /// shorter than the service TTL.
    pub async fn spawn_heartbeat(
        &self,
        category: &str,
        info: ServiceInfo,
        interval: Duration,
    ) -> Result<()> {
        let handle = self.registry.spawn_heartbeat(category, info, interval)?;
        self.tasks.lock().await.push(handle);
        Ok(())
    }

    /// Media service hosting `channel_id`, allocating one if needed
    pub async fn allocate(
        &self,
        channel_id: u64,
        tags: Option<&BTreeSet<String>>,
    ) -> Result<Option<ServiceInfo>> {
        self.allocator.get_or_allocate(channel_id, tags).await
    }

    /// Release the room of `channel_id`
    pub async fn deallocate(&self, channel_id: u64) -> Result<bool> {
        self.allocator.deallocate(channel_id).await
    }

    /// Effective permissions of a principal
    pub async fn get_permissions(&self, uid: u64) -> Result<BTreeSet<String>> {
        self.permissions.get_cached(uid).await
    }

    /// Forget cached permissions after a principal or group change
    pub async fn invalidate_permissions(&self, uid: u64) -> Result<()> {
        self.permissions.invalidate(uid).await
    }

    /// Whether a principal holds every permission in `required`
    pub async fn has_permissions<I, S>(&self, uid: u64, required: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.permissions.has_permissions(uid, required).await
    }

    /// Accept a request nonce once
    pub async fn consume_nonce(&self, nonce: &str) -> Result<bool> {
        self.nonces.consume(nonce).await
    }

    /// Get coordinator statistics
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            registry: self.registry.stats(),
            allocator: self.allocator.stats(),
            permissions: self.permissions.stats(),
        }
    }

    /// Stop background tasks and close the store pool
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let count = tasks.len();
        for task in tasks {
            task.abort();
        }

        if let Some(redis) = &self.redis {
            redis.close();
        }

        tracing::info!(tasks = count, "Coordinator shut down");
    }
}
