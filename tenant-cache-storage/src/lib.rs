//! Tenant Cache Storage - Local Store
//!
//! The per-service durable store of tenant cache entries. Defines the
//! [`TenantCacheStore`] contract and two implementations:
//!
//! - [`InMemoryTenantStore`]: a `HashMap` behind an async lock, for tests
//!   and single-process use.
//! - [`LmdbTenantStore`]: an LMDB environment with slug and status
//!   secondary indexes.
//!
//! Both enforce optimistic row versioning: every `save` is a
//! compare-and-swap on `CacheEntry::row_version`.

mod keys;
mod lmdb;
mod memory;
mod traits;

pub use keys::{StatusIndexKey, STATUS_KEY_LEN};
pub use lmdb::{LmdbStoreError, LmdbTenantStore};
pub use memory::InMemoryTenantStore;
pub use traits::{StoreStats, TenantCacheStore};
