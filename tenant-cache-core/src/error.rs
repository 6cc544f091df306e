//! Error types for tenant cache operations

use crate::{SourceVersion, TenantId};
use thiserror::Error;

/// Local store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Cache entry not found for tenant {tenant_id}")]
    NotFound { tenant_id: TenantId },

    #[error(
        "Version conflict for tenant {tenant_id}: expected row version {expected:?}, found {actual:?}"
    )]
    VersionConflict {
        tenant_id: TenantId,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Slug '{slug}' for tenant {tenant_id} is already held by tenant {holder}")]
    SlugConflict {
        slug: String,
        tenant_id: TenantId,
        holder: TenantId,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors raised while decoding or interpreting a registry event.
///
/// None of these can be fixed by redelivering the same record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Malformed event payload: {reason}")]
    Malformed { reason: String },

    #[error("Required field missing for {event_type} event: {field}")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("Unknown value for {field}: {value}")]
    UnknownVariant { field: &'static str, value: String },

    #[error("Record key {key} does not match payload tenant {tenant_id}")]
    PartitionKeyMismatch { key: TenantId, tenant_id: TenantId },

    #[error(
        "No cached snapshot for tenant {tenant_id} and {event_type} event at {source_version} carries only a partial payload"
    )]
    MissingSnapshot {
        tenant_id: TenantId,
        event_type: String,
        source_version: SourceVersion,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Event channel errors (poll, commit, dead-letter).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Poll failed: {reason}")]
    Poll { reason: String },

    #[error("Commit failed for partition {partition} offset {offset}: {reason}")]
    Commit {
        partition: u32,
        offset: u64,
        reason: String,
    },

    #[error("Dead-letter write failed: {reason}")]
    DeadLetter { reason: String },
}

/// Master error type for all tenant cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantCacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl TenantCacheError {
    /// Whether redelivering the same event could succeed.
    ///
    /// Non-retryable failures are routed to the dead-letter path; everything
    /// else is left unacknowledged for the channel to redeliver.
    ///
    /// A slug held by another live tenant only clears when that tenant's own
    /// event arrives, possibly on another partition, so redelivering the
    /// rejected event would block its partition until then.
    pub fn is_retryable(&self) -> bool {
        match self {
            TenantCacheError::Storage(StorageError::SlugConflict { .. }) => false,
            TenantCacheError::Storage(_) | TenantCacheError::Channel(_) => true,
            TenantCacheError::Event(_) | TenantCacheError::Config(_) => false,
        }
    }

    /// True for an optimistic-lock conflict on a cache row.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            TenantCacheError::Storage(StorageError::VersionConflict { .. })
        )
    }
}

/// Result type alias for tenant cache operations.
pub type CacheResult<T> = Result<T, TenantCacheError>;

// =============================================================================
// TESTS
// =============================================================================
