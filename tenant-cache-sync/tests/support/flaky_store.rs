use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tenant_cache_core::{
    CacheEntry, CacheResult, StorageError, TenantId, TenantStatus, Timestamp,
};
use tenant_cache_storage::{InMemoryTenantStore, StoreStats, TenantCacheStore};

/// In-memory store whose reads and writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryTenantStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    injected: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Number of faults returned so far.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool) -> CacheResult<()> {
        if flag.load(Ordering::SeqCst) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::TransactionFailed {
                reason: "injected fault".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TenantCacheStore for FlakyStore {
    async fn get(&self, tenant_id: TenantId) -> CacheResult<Option<CacheEntry>> {
        self.check(&self.fail_reads)?;
        self.inner.get(tenant_id).await
    }

    async fn save(&self, entry: CacheEntry, expected: Option<u64>) -> CacheResult<CacheEntry> {
        self.check(&self.fail_writes)?;
        self.inner.save(entry, expected).await
    }

    async fn find_by_slug(&self, slug: &str) -> CacheResult<Option<CacheEntry>> {
        self.check(&self.fail_reads)?;
        self.inner.find_by_slug(slug).await
    }

    async fn list_by_status(&self, status: TenantStatus) -> CacheResult<Vec<CacheEntry>> {
        self.check(&self.fail_reads)?;
        self.inner.list_by_status(status).await
    }

    async fn list_stale(&self, cutoff: Timestamp) -> CacheResult<Vec<CacheEntry>> {
        self.check(&self.fail_reads)?;
        self.inner.list_stale(cutoff).await
    }

    async fn count(&self) -> CacheResult<u64> {
        self.check(&self.fail_reads)?;
        self.inner.count().await
    }

    async fn stats(&self) -> CacheResult<StoreStats> {
        self.inner.stats().await
    }
}
