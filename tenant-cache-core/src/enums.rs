//! Enum types for tenant snapshots and lifecycle events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an enum from its wire/database string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

/// Implements the string conversions shared by every wire enum.
///
/// Wire strings are SCREAMING_SNAKE_CASE, matching the serde representation.
/// Parsing is case-insensitive.
macro_rules! wire_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $ty {
            /// All variants, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Convert to the wire/database string representation.
            pub fn as_wire_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $wire),+
                }
            }

            /// Parse from the wire/database string representation.
            pub fn from_wire_str(s: &str) -> Result<Self, EnumParseError> {
                let upper = s.trim().to_ascii_uppercase();
                match upper.as_str() {
                    $($wire => Ok($ty::$variant),)+
                    _ => Err(EnumParseError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_wire_str())
            }
        }

        impl FromStr for $ty {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_wire_str(s)
            }
        }
    };
}

// ============================================================================
// TENANT STATUS
// ============================================================================

/// Lifecycle status of a tenant, as decided by the Tenant Registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Trial,
    Active,
    Suspended,
    Expired,
    Cancelled,
}

wire_enum!(TenantStatus, "tenant status", {
    Trial => "TRIAL",
    Active => "ACTIVE",
    Suspended => "SUSPENDED",
    Expired => "EXPIRED",
    Cancelled => "CANCELLED",
});

impl TenantStatus {
    /// Statuses under which the base gate lets a tenant operate.
    pub fn is_operational(&self) -> bool {
        matches!(self, TenantStatus::Active | TenantStatus::Trial)
    }

    /// Single-byte discriminant used by the status secondary index.
    ///
    /// Values are persisted; never renumber.
    pub fn index_byte(&self) -> u8 {
        match self {
            TenantStatus::Trial => 0,
            TenantStatus::Active => 1,
            TenantStatus::Suspended => 2,
            TenantStatus::Expired => 3,
            TenantStatus::Cancelled => 4,
        }
    }

    /// Inverse of [`TenantStatus::index_byte`].
    pub fn from_index_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TenantStatus::Trial),
            1 => Some(TenantStatus::Active),
            2 => Some(TenantStatus::Suspended),
            3 => Some(TenantStatus::Expired),
            4 => Some(TenantStatus::Cancelled),
            _ => None,
        }
    }
}

// ============================================================================
// TENANT CATEGORY AND PLAN
// ============================================================================

/// Business category of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantType {
    #[default]
    Hotel,
    HotelChain,
    Resort,
    Hostel,
    VacationRental,
}

wire_enum!(TenantType, "tenant type", {
    Hotel => "HOTEL",
    HotelChain => "HOTEL_CHAIN",
    Resort => "RESORT",
    Hostel => "HOSTEL",
    VacationRental => "VACATION_RENTAL",
});

/// Subscription plan the tenant is billed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPlan {
    #[default]
    Free,
    Basic,
    Professional,
    Enterprise,
}

wire_enum!(SubscriptionPlan, "subscription plan", {
    Free => "FREE",
    Basic => "BASIC",
    Professional => "PROFESSIONAL",
    Enterprise => "ENTERPRISE",
});

// ============================================================================
// EVENT TYPE
// ============================================================================

/// Kind of lifecycle change carried by a registry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantEventType {
    Created,
    Updated,
    Suspended,
    Activated,
    Expired,
    Deleted,
}

wire_enum!(TenantEventType, "tenant event type", {
    Created => "CREATED",
    Updated => "UPDATED",
    Suspended => "SUSPENDED",
    Activated => "ACTIVATED",
    Expired => "EXPIRED",
    Deleted => "DELETED",
});

impl TenantEventType {
    /// Events that carry (and replace) the full snapshot.
    pub fn carries_full_snapshot(&self) -> bool {
        matches!(self, TenantEventType::Created | TenantEventType::Updated)
    }

    /// The status this event forces, for status-only transitions.
    ///
    /// `Deleted` maps to the terminal `Cancelled` status.
    pub fn forced_status(&self) -> Option<TenantStatus> {
        match self {
            TenantEventType::Suspended => Some(TenantStatus::Suspended),
            TenantEventType::Activated => Some(TenantStatus::Active),
            TenantEventType::Expired => Some(TenantStatus::Expired),
            TenantEventType::Deleted => Some(TenantStatus::Cancelled),
            TenantEventType::Created | TenantEventType::Updated => None,
        }
    }
}
