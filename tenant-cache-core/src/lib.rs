//! Tenant Cache Core - Data Types
//!
//! Pure data structures shared by every crate in the workspace: tenant
//! identity, the cached snapshot, lifecycle events and their wire format,
//! errors, and configuration. No I/O beyond reading a config file.

mod config;
mod enums;
mod error;
mod event;
mod identity;
mod tenant;

pub use config::{
    FailMode, GateConfig, MonitorConfig, StoreConfig, SyncConfig, TenantCacheConfig,
    DEFAULT_MAP_SIZE_MB, DEFAULT_MAX_CONFLICT_RETRIES, DEFAULT_MAX_REPORTED,
    DEFAULT_MONITOR_CHECK_INTERVAL_SECS, DEFAULT_POLL_IDLE_MS, DEFAULT_STALE_THRESHOLD_MINUTES,
    DEFAULT_STORE_PATH, MAX_MAP_SIZE_MB, MAX_STALE_THRESHOLD_MINUTES,
};
pub use enums::{EnumParseError, SubscriptionPlan, TenantEventType, TenantStatus, TenantType};
pub use error::{
    CacheResult, ChannelError, ConfigError, EventError, StorageError, TenantCacheError,
};
pub use event::{SnapshotPayload, TenantEvent};
pub use identity::{SourceVersion, TenantId, Timestamp};
pub use tenant::{stale_cutoff, CacheEntry, TenantSnapshot};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
