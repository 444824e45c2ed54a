//! Runtime statistics

pub mod metrics;

pub use metrics::{
    AllocatorCounters, AllocatorStats, CacheCounters, CacheStats, CoordinatorStats,
    RegistryCounters, RegistryStats,
};
