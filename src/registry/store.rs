//! Service registry implementation
//!
//! Membership is soft state: every registration is written with the
//! configured TTL and disappears on its own unless its owner refreshes it.
//! A crashed worker therefore drops out of discovery within one TTL
//! window without any health checking.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, ValidationError};
use crate::stats::{RegistryCounters, RegistryStats};
use crate::store::KvStore;

use super::config::RegistryConfig;
use super::entry::{validate_tags, ServiceInfo};
use super::key::{validate_segment, Keyspace};

/// Registry of live services, partitioned by category
pub struct ServiceRegistry {
    store: Arc<dyn KvStore>,
    keys: Keyspace,
    config: RegistryConfig,
    stats: RegistryCounters,
}

impl ServiceRegistry {
    /// Create a registry with default configuration
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let config = RegistryConfig::default();
        Self {
            store,
            keys: Keyspace::new(config.namespace.clone()),
            config,
            stats: RegistryCounters::default(),
        }
    }

    /// Create a registry with custom configuration
    pub fn with_config(store: Arc<dyn KvStore>, config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            keys: Keyspace::new(config.namespace.clone()),
            config,
            stats: RegistryCounters::default(),
        })
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Key layout used by this registry
    pub fn keyspace(&self) -> &Keyspace {
        &self.keys
    }

    /// Get a statistics snapshot
    pub fn stats(&self) -> RegistryStats {
        self.stats.snapshot()
    }

    /// Register or overwrite a service
    ///
    /// Last write wins. The entry expires after `service_ttl` unless
    /// refreshed.
    pub async fn register(&self, category: &str, info: &ServiceInfo) -> Result<()> {
        validate_segment("category", category)?;
        let payload = info.encode()?;
        let key = self.keys.service_key(category, &info.id);

        self.store
            .set(&key, payload, Some(self.config.service_ttl))
            .await?;
        self.stats.registered();

        tracing::info!(
            category = %category,
            service_id = %info.id,
            load_factor = info.load_factor,
            tags = ?info.tags,
            ttl_secs = self.config.service_ttl.as_secs(),
            "Service registered"
        );

        Ok(())
    }

    /// Extend a live registration by a fresh TTL
    ///
    /// Returns `false` and writes nothing if the entry does not exist. An
    /// expired identity is never resurrected; its owner has to register
    /// again.
    pub async fn refresh(&self, category: &str, id: &str) -> Result<bool> {
        validate_segment("category", category)?;
        validate_segment("service id", id)?;
        let key = self.keys.service_key(category, id);

        let refreshed = match self.store.get(&key).await? {
            Some(payload) => {
                let info = ServiceInfo::decode(&key, &payload)?;
                // Conditional write: an entry expiring between read and write stays gone
                self.store
                    .set_xx(&key, info.encode()?, Some(self.config.service_ttl))
                    .await?
            }
            None => false,
        };

        self.stats.refreshed(refreshed);

        if refreshed {
            tracing::debug!(category = %category, service_id = %id, "Service refreshed");
        } else {
            tracing::info!(category = %category, service_id = %id, "Refresh of unknown service ignored");
        }

        Ok(refreshed)
    }

    /// Remove a service. Returns whether an entry was deleted.
    pub async fn remove(&self, category: &str, id: &str) -> Result<bool> {
        validate_segment("category", category)?;
        validate_segment("service id", id)?;

        let removed = self
            .store
            .delete(&self.keys.service_key(category, id))
            .await?;

        if removed {
            self.stats.removed();
            tracing::info!(category = %category, service_id = %id, "Service removed");
        }

        Ok(removed)
    }

    /// Look up one service by id
    pub async fn service_info(&self, category: &str, id: &str) -> Result<Option<ServiceInfo>> {
        validate_segment("category", category)?;
        validate_segment("service id", id)?;
        let key = self.keys.service_key(category, id);

        match self.store.get(&key).await? {
            Some(payload) => Ok(Some(ServiceInfo::decode(&key, &payload)?)),
            None => Ok(None),
        }
    }

    /// All live services of a category, in scan order
    ///
    /// Entries that expire mid-scan are dropped silently. Entries that fail
    /// to decode are skipped with a warning.
    pub async fn list(&self, category: &str) -> Result<Vec<ServiceInfo>> {
        validate_segment("category", category)?;

        let keys = self
            .store
            .keys(&self.keys.category_prefix(category))
            .await?;
        let mut services = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(id) = self.keys.service_id(category, &key) else {
                continue;
            };

            let Some(payload) = self.store.get(&key).await? else {
                continue;
            };

            match ServiceInfo::decode(&key, &payload) {
                Ok(info) if info.id == id => services.push(info),
                Ok(info) => {
                    self.stats.skipped();
                    tracing::warn!(key = %key, service_id = %info.id, "Registry entry id does not match its key");
                }
                Err(e) => {
                    self.stats.skipped();
                    tracing::warn!(key = %key, error = %e, "Skipping malformed registry entry");
                }
            }
        }

        Ok(services)
    }

    /// Pick the least-loaded service qualifying for `tags`
    ///
    /// A service qualifies when its tags are a subset of `tags`; `None`
    /// admits every service. Ties on load factor go to the first entry in
    /// scan order.
    pub async fn find(
        &self,
        category: &str,
        tags: Option<&BTreeSet<String>>,
    ) -> Result<Option<ServiceInfo>> {
        validate_segment("category", category)?;
        if let Some(tags) = tags {
            validate_tags(tags)?;
        }

        let mut selected: Option<ServiceInfo> = None;
        for info in self.list(category).await? {
            if !info.qualifies_for(tags) {
                continue;
            }
            if selected
                .as_ref()
                .map_or(true, |best| info.load_factor < best.load_factor)
            {
                selected = Some(info);
            }
        }

        self.stats.looked_up(selected.is_some());

        match &selected {
            Some(info) => tracing::debug!(
                category = %category,
                service_id = %info.id,
                load_factor = info.load_factor,
                "Service selected"
            ),
            None => tracing::debug!(category = %category, tags = ?tags, "No qualifying service"),
        }

        Ok(selected)
    }

    /// Spawn an owner-side heartbeat for `info`
    ///
    /// Registers immediately, then refreshes every `interval`. If a refresh
    /// finds the entry gone (expired during an outage, or removed) the
    /// owner registers it again. Returns a handle that can be used to abort
    /// the task.
    ///
    /// The interval must be non-zero and shorter than the service TTL,
    /// otherwise the entry would lapse between beats. Category and record
    /// are validated here so a bad input fails the call instead of the task.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        category: impl Into<String>,
        info: ServiceInfo,
        interval: Duration,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let category = category.into();
        validate_segment("category", &category)?;
        info.validate()?;

        if interval.is_zero() || interval >= self.config.service_ttl {
            return Err(ValidationError::HeartbeatInterval {
                interval,
                ttl: self.config.service_ttl,
            }
            .into());
        }

        let registry = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut registered = false;

            loop {
                ticker.tick().await;

                let result = if registered {
                    match registry.refresh(&category, &info.id).await {
                        Ok(true) => Ok(()),
                        Ok(false) => {
                            tracing::warn!(
                                category = %category,
                                service_id = %info.id,
                                "Heartbeat found registration gone, registering again"
                            );
                            registry.register(&category, &info).await
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    registry.register(&category, &info).await
                };

                match result {
                    Ok(()) => registered = true,
                    Err(e) => {
                        tracing::warn!(
                            category = %category,
                            service_id = %info.id,
                            error = %e,
                            "Heartbeat failed"
                        );
                    }
                }
            }
        }))
    }
}
