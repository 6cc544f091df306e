//! Identity and ordering types for tenant cache entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Stable identifier of a tenant, as issued by the Tenant Registry.
///
/// Also the partition key of the event channel: every event for a tenant
/// travels on the partition selected by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Wrap an existing UUID.
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a new UUIDv7 tenant id (timestamp-sortable).
    pub fn now_v7() -> Self {
        Self(Uuid::now_v7())
    }

    /// The nil tenant id. Never issued by the registry.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Decode from the 16 raw bytes used as a storage key.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Monotonic marker assigned by the Tenant Registry to every change.
///
/// The registry may use a counter or a timestamp; timestamps are normalized
/// to epoch microseconds so both forms compare on the same axis. The cache
/// never accepts an event whose version is not strictly greater than the one
/// it already holds for that tenant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SourceVersion(u64);

impl SourceVersion {
    /// The version before any registry change.
    pub const ZERO: SourceVersion = SourceVersion(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Normalize a registry timestamp to a version (epoch microseconds).
    ///
    /// Returns `None` for instants before the Unix epoch.
    pub fn from_timestamp(at: Timestamp) -> Option<Self> {
        u64::try_from(at.timestamp_micros()).ok().map(Self)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// True if an event carrying `self` should replace state at `stored`.
    pub fn supersedes(&self, stored: SourceVersion) -> bool {
        self.0 > stored.0
    }
}

impl fmt::Display for SourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for SourceVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
