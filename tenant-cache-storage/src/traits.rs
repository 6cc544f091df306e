//! The local store contract and its statistics.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tenant_cache_core::{
    CacheEntry, CacheResult, StorageError, TenantId, TenantStatus, Timestamp,
};

/// Durable per-service store of tenant cache entries.
///
/// Implementations must be safe for concurrent use: gate reads run with
/// unrestricted concurrency alongside the synchronizer's writes.
///
/// # Row Versioning
///
/// Every entry carries a `row_version`. [`TenantCacheStore::save`] is a
/// compare-and-swap on that column: it succeeds only if the stored row
/// version equals `expected` (or no row exists when `expected` is `None`),
/// and stores the entry with `row_version` incremented. A mismatch fails
/// with `StorageError::VersionConflict` and writes nothing.
///
/// There is no delete. Tombstoned entries stay in the store forever.
#[async_trait]
pub trait TenantCacheStore: Send + Sync {
    /// Fetch the entry for a tenant, if one has been observed.
    async fn get(&self, tenant_id: TenantId) -> CacheResult<Option<CacheEntry>>;

    /// Compare-and-swap write. Returns the entry as stored.
    async fn save(&self, entry: CacheEntry, expected: Option<u64>) -> CacheResult<CacheEntry>;

    /// Look up an entry by its unique slug.
    async fn find_by_slug(&self, slug: &str) -> CacheResult<Option<CacheEntry>>;

    /// All entries currently in `status`, including tombstones.
    async fn list_by_status(&self, status: TenantStatus) -> CacheResult<Vec<CacheEntry>>;

    /// Entries never synced or last synced strictly before `cutoff`.
    async fn list_stale(&self, cutoff: Timestamp) -> CacheResult<Vec<CacheEntry>>;

    /// Number of entries, tombstones included.
    async fn count(&self) -> CacheResult<u64>;

    async fn stats(&self) -> CacheResult<StoreStats>;
}

/// Point-in-time statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Calls to `get` and `find_by_slug`.
    pub reads: u64,
    pub hits: u64,
    pub misses: u64,
    /// Successful saves.
    pub writes: u64,
    /// Saves rejected by the row-version check.
    pub version_conflicts: u64,
    pub entry_count: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters shared by the store implementations.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    version_conflicts: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_lookup(&self, found: bool) {
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: u64) -> StoreStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        StoreStats {
            reads: hits + misses,
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            entry_count,
        }
    }
}

/// Validate a compare-and-swap against the current row and slug holder.
///
/// `slug_holder` is the live tenant indexed under the entry's slug, if any.
/// Tombstones hold no slug, so they never conflict and are never holders.
/// Returns the entry to store, with its row version bumped.
pub(crate) fn check_save(
    entry: &CacheEntry,
    current: Option<&CacheEntry>,
    expected: Option<u64>,
    slug_holder: Option<TenantId>,
) -> Result<CacheEntry, StorageError> {
    let tenant_id = entry.tenant_id();
    let actual = current.map(|c| c.row_version);
    if actual != expected {
        return Err(StorageError::VersionConflict {
            tenant_id,
            expected,
            actual,
        });
    }
    let rival = slug_holder.filter(|holder| entry.holds_slug() && *holder != tenant_id);
    if let Some(holder) = rival {
        return Err(StorageError::SlugConflict {
            slug: entry.slug().to_string(),
            tenant_id,
            holder,
        });
    }
    let mut stored = entry.clone();
    stored.row_version = actual.map_or(1, |v| v + 1);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_stats_hit_rate() {
        let stats = StoreStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = StoreStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.record_lookup(true);
        recorder.record_lookup(true);
        recorder.record_lookup(false);
        recorder.record_write();
        recorder.record_conflict();

        let stats = recorder.snapshot(7);
        assert_eq!(stats.reads, 3);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.version_conflicts, 1);
        assert_eq!(stats.entry_count, 7);
    }
}
