//! Tenant lifecycle events and their wire format.
//!
//! Events arrive on a durable, partitioned, at-least-once log whose partition
//! key MUST be the tenant id. Ordering is only guaranteed among events of the
//! same tenant, and duplicates are expected.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "tenantId": "0190c7a2-6b1e-7cc0-9a51-3e3b8a0f4d21",
//!   "eventType": "CREATED",
//!   "name": "Harbor View Inn",
//!   "slug": "harbor-view-inn",
//!   "type": "HOTEL",
//!   "status": "TRIAL",
//!   "subscriptionPlan": "BASIC",
//!   "deletedAt": null,
//!   "sourceVersion": 17
//! }
//! ```
//!
//! `sourceVersion` is either a non-negative integer counter or an RFC 3339
//! timestamp; timestamps are normalized to epoch microseconds.

use crate::{
    EventError, SourceVersion, SubscriptionPlan, TenantEventType, TenantId, TenantSnapshot,
    TenantStatus, TenantType, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Snapshot fields carried by an event. Status-only events may omit any of
/// them; CREATED and UPDATED must carry all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotPayload {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub tenant_type: Option<TenantType>,
    pub status: Option<TenantStatus>,
    pub subscription_plan: Option<SubscriptionPlan>,
}

impl SnapshotPayload {
    /// Name of the first field missing for a full snapshot, if any.
    pub fn first_missing_field(&self) -> Option<&'static str> {
        if self.name.is_none() {
            Some("name")
        } else if self.slug.is_none() {
            Some("slug")
        } else if self.tenant_type.is_none() {
            Some("type")
        } else if self.status.is_none() {
            Some("status")
        } else if self.subscription_plan.is_none() {
            Some("subscriptionPlan")
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.first_missing_field().is_none()
    }

    /// Materialize a full snapshot, or `None` if any field is missing.
    pub fn to_snapshot(
        &self,
        tenant_id: TenantId,
        deleted_at: Option<Timestamp>,
        source_version: SourceVersion,
    ) -> Option<TenantSnapshot> {
        Some(TenantSnapshot {
            tenant_id,
            name: self.name.clone()?,
            slug: self.slug.clone()?,
            tenant_type: self.tenant_type?,
            status: self.status?,
            subscription_plan: self.subscription_plan?,
            deleted_at,
            source_version,
        })
    }
}

/// A decoded, validated registry event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantEvent {
    pub tenant_id: TenantId,
    pub event_type: TenantEventType,
    pub payload: SnapshotPayload,
    /// Deletion instant for DELETED events; ignored when absent.
    pub deleted_at: Option<Timestamp>,
    pub source_version: SourceVersion,
}

impl TenantEvent {
    /// Build a CREATED or UPDATED event carrying the whole snapshot.
    pub fn from_snapshot(event_type: TenantEventType, snapshot: &TenantSnapshot) -> Self {
        Self {
            tenant_id: snapshot.tenant_id,
            event_type,
            payload: SnapshotPayload {
                name: Some(snapshot.name.clone()),
                slug: Some(snapshot.slug.clone()),
                tenant_type: Some(snapshot.tenant_type),
                status: Some(snapshot.status),
                subscription_plan: Some(snapshot.subscription_plan),
            },
            deleted_at: snapshot.deleted_at,
            source_version: snapshot.source_version,
        }
    }

    /// Build a status-only event with an empty payload.
    pub fn transition(
        tenant_id: TenantId,
        event_type: TenantEventType,
        source_version: SourceVersion,
    ) -> Self {
        Self {
            tenant_id,
            event_type,
            payload: SnapshotPayload::default(),
            deleted_at: None,
            source_version,
        }
    }

    /// Build a DELETED event.
    pub fn deleted(
        tenant_id: TenantId,
        source_version: SourceVersion,
        deleted_at: Option<Timestamp>,
    ) -> Self {
        Self {
            deleted_at,
            ..Self::transition(tenant_id, TenantEventType::Deleted, source_version)
        }
    }

    /// The channel partition key for this event.
    pub fn partition_key(&self) -> TenantId {
        self.tenant_id
    }

    /// Check the per-type payload requirements.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_type.carries_full_snapshot() {
            if let Some(field) = self.payload.first_missing_field() {
                return Err(EventError::MissingField {
                    event_type: self.event_type.to_string(),
                    field,
                });
            }
        }
        Ok(())
    }

    /// Decode and validate an event from its JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let wire: WireTenantEvent =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed {
                reason: e.to_string(),
            })?;
        let event = wire.into_event()?;
        event.validate()?;
        Ok(event)
    }

    /// Encode to the JSON wire form. Counter versions are written as numbers.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        let wire = WireTenantEvent {
            tenant_id: self.tenant_id,
            event_type: self.event_type.as_wire_str().to_string(),
            name: self.payload.name.clone(),
            slug: self.payload.slug.clone(),
            tenant_type: self.payload.tenant_type.map(|t| t.as_wire_str().to_string()),
            status: self.payload.status.map(|s| s.as_wire_str().to_string()),
            subscription_plan: self
                .payload
                .subscription_plan
                .map(|p| p.as_wire_str().to_string()),
            deleted_at: self.deleted_at,
            source_version: WireSourceVersion::Counter(self.source_version.value()),
        };
        serde_json::to_vec(&wire).map_err(|e| EventError::Malformed {
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// WIRE REPRESENTATION
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTenantEvent {
    tenant_id: TenantId,
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slug: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    tenant_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subscription_plan: Option<String>,
    #[serde(default)]
    deleted_at: Option<Timestamp>,
    source_version: WireSourceVersion,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireSourceVersion {
    Counter(u64),
    Timestamp(Timestamp),
}

impl WireSourceVersion {
    fn normalize(self) -> Result<SourceVersion, EventError> {
        match self {
            WireSourceVersion::Counter(value) => Ok(SourceVersion::new(value)),
            WireSourceVersion::Timestamp(at) => {
                SourceVersion::from_timestamp(at).ok_or_else(|| EventError::Malformed {
                    reason: format!("sourceVersion timestamp {at} predates the epoch"),
                })
            }
        }
    }
}

fn parse_field<T>(
    field: &'static str,
    raw: Option<String>,
    parse: impl Fn(&str) -> Result<T, crate::EnumParseError>,
) -> Result<Option<T>, EventError> {
    raw.map(|value| {
        parse(&value).map_err(|_| EventError::UnknownVariant { field, value })
    })
    .transpose()
}

impl WireTenantEvent {
    fn into_event(self) -> Result<TenantEvent, EventError> {
        let event_type = TenantEventType::from_wire_str(&self.event_type).map_err(|_| {
            EventError::UnknownVariant {
                field: "eventType",
                value: self.event_type.clone(),
            }
        })?;
        let payload = SnapshotPayload {
            name: self.name,
            slug: self.slug,
            tenant_type: parse_field("type", self.tenant_type, TenantType::from_wire_str)?,
            status: parse_field("status", self.status, TenantStatus::from_wire_str)?,
            subscription_plan: parse_field(
                "subscriptionPlan",
                self.subscription_plan,
                SubscriptionPlan::from_wire_str,
            )?,
        };
        Ok(TenantEvent {
            tenant_id: self.tenant_id,
            event_type,
            payload,
            deleted_at: self.deleted_at,
            source_version: self.source_version.normalize()?,
        })
    }
}
