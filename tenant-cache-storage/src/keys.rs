//! Binary keys for the LMDB secondary indexes.

use tenant_cache_core::{TenantId, TenantStatus};

/// Separator byte between the status discriminant and the tenant id.
const SEPARATOR: u8 = 0xFF;

/// Length of an encoded [`StatusIndexKey`].
pub const STATUS_KEY_LEN: usize = 18;

/// Composite key of the status index.
///
/// # Binary Format
///
/// - Byte 0: status discriminant ([`TenantStatus::index_byte`])
/// - Byte 1: separator (0xFF)
/// - Bytes 2-17: tenant_id (UUID as bytes)
///
/// Keys sort by status first, so every tenant in one status is a single
/// contiguous prefix range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusIndexKey {
    status: TenantStatus,
    tenant_id: TenantId,
}

impl StatusIndexKey {
    pub fn new(status: TenantStatus, tenant_id: TenantId) -> Self {
        Self { status, tenant_id }
    }

    pub fn status(&self) -> TenantStatus {
        self.status
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn encode(&self) -> [u8; STATUS_KEY_LEN] {
        let mut bytes = [0u8; STATUS_KEY_LEN];
        bytes[0..2].copy_from_slice(&Self::prefix(self.status));
        bytes[2..].copy_from_slice(self.tenant_id.as_bytes());
        bytes
    }

    /// Returns `None` for a wrong length, a bad separator or an unknown status.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != STATUS_KEY_LEN || bytes[1] != SEPARATOR {
            return None;
        }
        let status = TenantStatus::from_index_byte(bytes[0])?;
        let tenant_id = TenantId::from_slice(&bytes[2..])?;
        Some(Self { status, tenant_id })
    }

    /// Prefix shared by every key in `status`.
    pub fn prefix(status: TenantStatus) -> [u8; 2] {
        [status.index_byte(), SEPARATOR]
    }
}
