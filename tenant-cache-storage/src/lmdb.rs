//! LMDB-backed tenant store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a durable, memory-mapped
//! store that survives service restarts.
//!
//! # Layout
//!
//! One environment with three named databases:
//! - `entries`: tenant id (16 bytes) -> JSON-encoded [`CacheEntry`]
//! - `slug_index`: slug (UTF-8) -> tenant id
//! - `status_index`: [`StatusIndexKey`] -> empty
//!
//! # Atomicity
//!
//! LMDB serializes write transactions. `save` reads the current row, checks
//! the row version and slug ownership, and writes the row plus both indexes
//! inside a single write transaction, so a load-compare-write either lands
//! completely or not at all. Readers see the last committed state and never
//! wait on the writer.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use tenant_cache_core::{
    CacheEntry, CacheResult, StorageError, StoreConfig, TenantCacheError, TenantId, TenantStatus,
    Timestamp,
};

use crate::keys::StatusIndexKey;
use crate::traits::{check_save, StatsRecorder, StoreStats, TenantCacheStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a named database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: &'static str, reason: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt index entry in {0}")]
    CorruptIndex(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        LmdbStoreError::Transaction(e.to_string())
    }
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) => StorageError::Serialization { reason },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<LmdbStoreError> for TenantCacheError {
    fn from(e: LmdbStoreError) -> Self {
        TenantCacheError::Storage(e.into())
    }
}

const ENTRIES_DB: &str = "entries";
const SLUG_INDEX_DB: &str = "slug_index";
const STATUS_INDEX_DB: &str = "status_index";

/// Durable `TenantCacheStore` on LMDB.
///
/// # Example
///
/// ```ignore
/// use tenant_cache_storage::{LmdbTenantStore, TenantCacheStore};
///
/// let store = LmdbTenantStore::open("/var/lib/payments/tenant-cache", 64)?;
/// let entry = store.get(tenant_id).await?;
/// ```
pub struct LmdbTenantStore {
    env: Env,
    entries: Database<Bytes, Bytes>,
    slug_index: Database<Bytes, Bytes>,
    status_index: Database<Bytes, Bytes>,
    stats: StatsRecorder,
}

impl LmdbTenantStore {
    /// Open (or create) the store under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment or one of its databases cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = map_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {map_size_mb} MiB overflows usize"))
        })?;
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this store; no other
        // process opens it with conflicting flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let entries = env
            .create_database(&mut wtxn, Some(ENTRIES_DB))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: ENTRIES_DB,
                reason: e.to_string(),
            })?;
        let slug_index = env
            .create_database(&mut wtxn, Some(SLUG_INDEX_DB))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: SLUG_INDEX_DB,
                reason: e.to_string(),
            })?;
        let status_index = env
            .create_database(&mut wtxn, Some(STATUS_INDEX_DB))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: STATUS_INDEX_DB,
                reason: e.to_string(),
            })?;
        wtxn.commit()?;

        tracing::info!(path = %path.as_ref().display(), map_size_mb, "Opened LMDB tenant store");

        Ok(Self {
            env,
            entries,
            slug_index,
            status_index,
            stats: StatsRecorder::default(),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, LmdbStoreError> {
        Self::open(&config.path, config.map_size_mb)
    }

    fn read_entry(
        &self,
        txn: &RoTxn<'_>,
        tenant_id: TenantId,
    ) -> Result<Option<CacheEntry>, LmdbStoreError> {
        match self.entries.get(txn, tenant_id.as_bytes().as_slice())? {
            Some(bytes) => decode_entry(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn slug_owner(&self, txn: &RoTxn<'_>, slug: &str) -> Result<Option<TenantId>, LmdbStoreError> {
        match self.slug_index.get(txn, slug.as_bytes())? {
            Some(bytes) => TenantId::from_slice(bytes)
                .map(Some)
                .ok_or(LmdbStoreError::CorruptIndex(SLUG_INDEX_DB)),
            None => Ok(None),
        }
    }

    fn scan_entries(
        &self,
        mut keep: impl FnMut(&CacheEntry) -> bool,
    ) -> Result<Vec<CacheEntry>, LmdbStoreError> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for result in self.entries.iter(&rtxn)? {
            let (_, bytes) = result?;
            let entry = decode_entry(bytes)?;
            if keep(&entry) {
                out.push(entry);
            }
        }
        Ok(out)
    }

    fn save_inner(
        &self,
        entry: &CacheEntry,
        expected: Option<u64>,
    ) -> Result<Result<CacheEntry, StorageError>, LmdbStoreError> {
        let tenant_id = entry.tenant_id();
        let mut wtxn = self.env.write_txn()?;

        let current = self.read_entry(&wtxn, tenant_id)?;
        let slug_holder = if entry.holds_slug() {
            match self.slug_owner(&wtxn, entry.slug())? {
                Some(holder) if holder == tenant_id => Some(holder),
                Some(holder) => self
                    .read_entry(&wtxn, holder)?
                    .filter(CacheEntry::holds_slug)
                    .map(|_| holder),
                None => None,
            }
        } else {
            None
        };

        let stored = match check_save(entry, current.as_ref(), expected, slug_holder) {
            Ok(stored) => stored,
            Err(rejected) => {
                wtxn.abort();
                return Ok(Err(rejected));
            }
        };

        if let Some(current) = &current {
            let moved = current.slug() != stored.slug() || !stored.holds_slug();
            if !current.slug().is_empty()
                && moved
                && self.slug_owner(&wtxn, current.slug())? == Some(tenant_id)
            {
                self.slug_index
                    .delete(&mut wtxn, current.slug().as_bytes())?;
            }
            if current.status() != stored.status() {
                let old_key = StatusIndexKey::new(current.status(), tenant_id).encode();
                self.status_index.delete(&mut wtxn, old_key.as_slice())?;
            }
        }
        if stored.holds_slug() {
            self.slug_index.put(
                &mut wtxn,
                stored.slug().as_bytes(),
                tenant_id.as_bytes().as_slice(),
            )?;
        }
        let status_key = StatusIndexKey::new(stored.status(), tenant_id).encode();
        self.status_index
            .put(&mut wtxn, status_key.as_slice(), b"".as_slice())?;

        let row = serde_json::to_vec(&stored)
            .map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        self.entries
            .put(&mut wtxn, tenant_id.as_bytes().as_slice(), row.as_slice())?;

        wtxn.commit()?;
        Ok(Ok(stored))
    }
}

fn decode_entry(bytes: &[u8]) -> Result<CacheEntry, LmdbStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

#[async_trait]
impl TenantCacheStore for LmdbTenantStore {
    async fn get(&self, tenant_id: TenantId) -> CacheResult<Option<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let entry = self.read_entry(&rtxn, tenant_id)?;
        self.stats.record_lookup(entry.is_some());
        Ok(entry)
    }

    async fn save(&self, entry: CacheEntry, expected: Option<u64>) -> CacheResult<CacheEntry> {
        match self.save_inner(&entry, expected)? {
            Ok(stored) => {
                self.stats.record_write();
                Ok(stored)
            }
            Err(rejected) => {
                if matches!(rejected, StorageError::VersionConflict { .. }) {
                    self.stats.record_conflict();
                }
                Err(rejected.into())
            }
        }
    }

    async fn find_by_slug(&self, slug: &str) -> CacheResult<Option<CacheEntry>> {
        if slug.is_empty() {
            self.stats.record_lookup(false);
            return Ok(None);
        }
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let entry = match self.slug_owner(&rtxn, slug)? {
            Some(tenant_id) => self
                .read_entry(&rtxn, tenant_id)?
                .filter(CacheEntry::holds_slug),
            None => None,
        };
        self.stats.record_lookup(entry.is_some());
        Ok(entry)
    }

    async fn list_by_status(&self, status: TenantStatus) -> CacheResult<Vec<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        let prefix = StatusIndexKey::prefix(status);
        let mut out = Vec::new();
        for result in self
            .status_index
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(LmdbStoreError::from)?
        {
            let (key, _) = result.map_err(LmdbStoreError::from)?;
            let key =
                StatusIndexKey::decode(key).ok_or(LmdbStoreError::CorruptIndex(STATUS_INDEX_DB))?;
            if let Some(entry) = self.read_entry(&rtxn, key.tenant_id())? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    async fn list_stale(&self, cutoff: Timestamp) -> CacheResult<Vec<CacheEntry>> {
        Ok(self.scan_entries(|entry| entry.is_stale(cutoff))?)
    }

    async fn count(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn().map_err(LmdbStoreError::from)?;
        Ok(self.entries.len(&rtxn).map_err(LmdbStoreError::from)?)
    }

    async fn stats(&self) -> CacheResult<StoreStats> {
        let count = self.count().await?;
        Ok(self.stats.snapshot(count))
    }
}
