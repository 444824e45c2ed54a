//! Statistics for coordinator components
//!
//! Each component owns a set of lock-free counters and hands out plain
//! snapshots on request.

use std::sync::atomic::{AtomicU64, Ordering};

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Live counters for the service registry
#[derive(Debug, Default)]
pub struct RegistryCounters {
    registrations: AtomicU64,
    refreshes: AtomicU64,
    refresh_misses: AtomicU64,
    removals: AtomicU64,
    lookups: AtomicU64,
    lookup_misses: AtomicU64,
    skipped_entries: AtomicU64,
}

impl RegistryCounters {
    pub(crate) fn registered(&self) {
        bump(&self.registrations);
    }

    pub(crate) fn refreshed(&self, found: bool) {
        if found {
            bump(&self.refreshes);
        } else {
            bump(&self.refresh_misses);
        }
    }

    pub(crate) fn removed(&self) {
        bump(&self.removals);
    }

    pub(crate) fn looked_up(&self, found: bool) {
        bump(&self.lookups);
        if !found {
            bump(&self.lookup_misses);
        }
    }

    pub(crate) fn skipped(&self) {
        bump(&self.skipped_entries);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> RegistryStats {
        RegistryStats {
            registrations: read(&self.registrations),
            refreshes: read(&self.refreshes),
            refresh_misses: read(&self.refresh_misses),
            removals: read(&self.removals),
            lookups: read(&self.lookups),
            lookup_misses: read(&self.lookup_misses),
            skipped_entries: read(&self.skipped_entries),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Successful registrations
    pub registrations: u64,
    /// Refreshes that extended a live entry
    pub refreshes: u64,
    /// Refreshes of entries that no longer existed
    pub refresh_misses: u64,
    /// Removals that deleted an entry
    pub removals: u64,
    /// `find` calls
    pub lookups: u64,
    /// `find` calls that found no qualifying service
    pub lookup_misses: u64,
    /// Entries skipped during scans because they failed to decode
    pub skipped_entries: u64,
}

/// Live counters for the room allocator
#[derive(Debug, Default)]
pub struct AllocatorCounters {
    allocations: AtomicU64,
    reuses: AtomicU64,
    evictions: AtomicU64,
    no_capacity: AtomicU64,
    deallocations: AtomicU64,
}

impl AllocatorCounters {
    pub(crate) fn allocated(&self) {
        bump(&self.allocations);
    }

    pub(crate) fn reused(&self) {
        bump(&self.reuses);
    }

    pub(crate) fn evicted(&self) {
        bump(&self.evictions);
    }

    pub(crate) fn no_capacity(&self) {
        bump(&self.no_capacity);
    }

    pub(crate) fn deallocated(&self) {
        bump(&self.deallocations);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: read(&self.allocations),
            reuses: read(&self.reuses),
            evictions: read(&self.evictions),
            no_capacity: read(&self.no_capacity),
            deallocations: read(&self.deallocations),
        }
    }
}

/// Allocator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Fresh assignments written
    pub allocations: u64,
    /// Calls answered from an existing assignment
    pub reuses: u64,
    /// Existing assignments discarded because their service was not live
    pub evictions: u64,
    /// Calls that found no qualifying service
    pub no_capacity: u64,
    /// Deallocations that removed an assignment
    pub deallocations: u64,
}

/// Live counters for the permission cache
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fills: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        bump(&self.hits);
    }

    pub(crate) fn miss(&self) {
        bump(&self.misses);
    }

    pub(crate) fn filled(&self) {
        bump(&self.fills);
    }

    pub(crate) fn invalidated(&self) {
        bump(&self.invalidations);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: read(&self.hits),
            misses: read(&self.misses),
            fills: read(&self.fills),
            invalidations: read(&self.invalidations),
        }
    }
}

/// Permission cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that recomputed from the source
    pub misses: u64,
    /// Recomputed sets written back to the cache
    pub fills: u64,
    /// Explicit invalidations
    pub invalidations: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Coordinator-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub registry: RegistryStats,
    pub allocator: AllocatorStats,
    pub permissions: CacheStats,
}
