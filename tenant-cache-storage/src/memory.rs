//! In-memory store for tests and single-process deployments.

use crate::traits::{check_save, StatsRecorder, StoreStats, TenantCacheStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tenant_cache_core::{
    CacheEntry, CacheResult, StorageError, TenantId, TenantStatus, Timestamp,
};

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<TenantId, CacheEntry>,
    slugs: HashMap<String, TenantId>,
}

/// `TenantCacheStore` backed by a `HashMap` behind one async lock.
///
/// A save holds the write lock across its version check, slug check and
/// write, which makes it atomic with respect to every other call.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    state: tokio::sync::RwLock<MemoryState>,
    stats: StatsRecorder,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantCacheStore for InMemoryTenantStore {
    async fn get(&self, tenant_id: TenantId) -> CacheResult<Option<CacheEntry>> {
        let state = self.state.read().await;
        let entry = state.entries.get(&tenant_id).cloned();
        self.stats.record_lookup(entry.is_some());
        Ok(entry)
    }

    async fn save(&self, entry: CacheEntry, expected: Option<u64>) -> CacheResult<CacheEntry> {
        let mut state = self.state.write().await;
        let tenant_id = entry.tenant_id();
        let current = state.entries.get(&tenant_id);
        let slug_holder = if entry.holds_slug() {
            state
                .slugs
                .get(entry.slug())
                .copied()
                .filter(|holder| {
                    state
                        .entries
                        .get(holder)
                        .is_some_and(CacheEntry::holds_slug)
                })
        } else {
            None
        };

        let stored = match check_save(&entry, current, expected, slug_holder) {
            Ok(stored) => stored,
            Err(e) => {
                if matches!(e, StorageError::VersionConflict { .. }) {
                    self.stats.record_conflict();
                }
                return Err(e.into());
            }
        };

        let old_slug = current.map(|c| c.slug().to_string());
        if let Some(old_slug) = old_slug.filter(|s| !s.is_empty()) {
            let moved = old_slug != stored.slug() || !stored.holds_slug();
            if moved && state.slugs.get(&old_slug) == Some(&tenant_id) {
                state.slugs.remove(&old_slug);
            }
        }
        if stored.holds_slug() {
            state.slugs.insert(stored.slug().to_string(), tenant_id);
        }
        state.entries.insert(tenant_id, stored.clone());
        self.stats.record_write();
        Ok(stored)
    }

    async fn find_by_slug(&self, slug: &str) -> CacheResult<Option<CacheEntry>> {
        let state = self.state.read().await;
        let entry = state
            .slugs
            .get(slug)
            .and_then(|id| state.entries.get(id))
            .cloned();
        self.stats.record_lookup(entry.is_some());
        Ok(entry)
    }

    async fn list_by_status(&self, status: TenantStatus) -> CacheResult<Vec<CacheEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<CacheEntry> = state
            .entries
            .values()
            .filter(|e| e.status() == status)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.tenant_id());
        Ok(entries)
    }

    async fn list_stale(&self, cutoff: Timestamp) -> CacheResult<Vec<CacheEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<CacheEntry> = state
            .entries
            .values()
            .filter(|e| e.is_stale(cutoff))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.tenant_id());
        Ok(entries)
    }

    async fn count(&self) -> CacheResult<u64> {
        Ok(self.state.read().await.entries.len() as u64)
    }

    async fn stats(&self) -> CacheResult<StoreStats> {
        let count = self.state.read().await.entries.len() as u64;
        Ok(self.stats.snapshot(count))
    }
}
