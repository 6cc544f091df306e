//! Tenant snapshot and local cache entry

use crate::{SourceVersion, SubscriptionPlan, TenantId, TenantStatus, TenantType, Timestamp};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// The `last_synced_at` cutoff for a staleness threshold in minutes.
///
/// Negative thresholds count as zero. A threshold reaching past the earliest
/// representable instant clamps to it, so only never-synced entries are stale.
pub fn stale_cutoff(now: Timestamp, threshold_minutes: i64) -> Timestamp {
    TimeDelta::try_minutes(threshold_minutes.max(0))
        .and_then(|threshold| now.checked_sub_signed(threshold))
        .unwrap_or(Timestamp::MIN_UTC)
}

/// Authoritative tenant fields mirrored from the Tenant Registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub tenant_id: TenantId,
    pub name: String,
    /// Unique human-readable key. Empty only on tombstones created from a
    /// partial payload.
    pub slug: String,
    pub tenant_type: TenantType,
    pub status: TenantStatus,
    pub subscription_plan: SubscriptionPlan,
    /// Soft-delete marker. Terminal once set.
    pub deleted_at: Option<Timestamp>,
    pub source_version: SourceVersion,
}

impl TenantSnapshot {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A tenant snapshot plus local bookkeeping, one per tenant per service.
///
/// Entries are created by the first observed event and never removed;
/// deletion only sets `snapshot.deleted_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub snapshot: TenantSnapshot,
    /// When this entry last absorbed an event. `None` for rows that were
    /// loaded by other means and never synced.
    pub last_synced_at: Option<Timestamp>,
    pub cache_created_at: Timestamp,
    pub cache_updated_at: Timestamp,
    /// Optimistic-lock column. Zero until first persisted; every successful
    /// save increments it.
    pub row_version: u64,
}

impl CacheEntry {
    /// Build a fresh, not-yet-persisted entry that has just absorbed an event.
    pub fn new(snapshot: TenantSnapshot, now: Timestamp) -> Self {
        Self {
            snapshot,
            last_synced_at: Some(now),
            cache_created_at: now,
            cache_updated_at: now,
            row_version: 0,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.snapshot.tenant_id
    }

    pub fn status(&self) -> TenantStatus {
        self.snapshot.status
    }

    pub fn source_version(&self) -> SourceVersion {
        self.snapshot.source_version
    }

    pub fn slug(&self) -> &str {
        &self.snapshot.slug
    }

    pub fn is_deleted(&self) -> bool {
        self.snapshot.is_deleted()
    }

    /// Whether this entry occupies its slug in the slug index.
    ///
    /// Tombstones release their slug so the registry can reissue it.
    pub fn holds_slug(&self) -> bool {
        !self.slug().is_empty() && !self.is_deleted()
    }

    /// Not deleted and in an operational status (ACTIVE or TRIAL).
    pub fn is_operational(&self) -> bool {
        !self.is_deleted() && self.snapshot.status.is_operational()
    }

    /// Not deleted and exactly ACTIVE.
    pub fn is_active(&self) -> bool {
        !self.is_deleted() && self.snapshot.status == TenantStatus::Active
    }

    /// Never synced, or last synced strictly before `cutoff`.
    pub fn is_stale(&self, cutoff: Timestamp) -> bool {
        match self.last_synced_at {
            Some(synced) => synced < cutoff,
            None => true,
        }
    }

    /// Record that the entry absorbed an event at `now`.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_synced_at = Some(now);
        self.cache_updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn snapshot(status: TenantStatus) -> TenantSnapshot {
        TenantSnapshot {
            tenant_id: TenantId::now_v7(),
            name: "Harbor View Inn".to_string(),
            slug: "harbor-view-inn".to_string(),
            tenant_type: TenantType::Hotel,
            status,
            subscription_plan: SubscriptionPlan::Basic,
            deleted_at: None,
            source_version: SourceVersion::new(1),
        }
    }

    #[test]
    fn test_new_entry_is_synced_and_unpersisted() {
        let now = Utc::now();
        let entry = CacheEntry::new(snapshot(TenantStatus::Trial), now);
        assert_eq!(entry.last_synced_at, Some(now));
        assert_eq!(entry.cache_created_at, now);
        assert_eq!(entry.cache_updated_at, now);
        assert_eq!(entry.row_version, 0);
    }

    #[test]
    fn test_operational_and_active() {
        let now = Utc::now();
        let trial = CacheEntry::new(snapshot(TenantStatus::Trial), now);
        assert!(trial.is_operational());
        assert!(!trial.is_active());

        let active = CacheEntry::new(snapshot(TenantStatus::Active), now);
        assert!(active.is_operational());
        assert!(active.is_active());

        for status in [
            TenantStatus::Suspended,
            TenantStatus::Expired,
            TenantStatus::Cancelled,
        ] {
            let entry = CacheEntry::new(snapshot(status), now);
            assert!(!entry.is_operational(), "{status} must not be operational");
            assert!(!entry.is_active());
        }
    }

    #[test]
    fn test_deleted_dominates_status() {
        let now = Utc::now();
        let mut entry = CacheEntry::new(snapshot(TenantStatus::Active), now);
        entry.snapshot.deleted_at = Some(now);
        assert!(entry.is_deleted());
        assert!(!entry.is_operational());
        assert!(!entry.is_active());
        assert!(!entry.holds_slug());
    }

    #[test]
    fn test_only_live_entries_hold_slugs() {
        let now = Utc::now();
        let live = CacheEntry::new(snapshot(TenantStatus::Suspended), now);
        assert!(live.holds_slug());

        let mut unslugged = snapshot(TenantStatus::Active);
        unslugged.slug.clear();
        assert!(!CacheEntry::new(unslugged, now).holds_slug());
    }

    #[test]
    fn test_stale_cutoff_clamps_out_of_range_thresholds() {
        let now = Utc::now();
        assert_eq!(stale_cutoff(now, 60), now - Duration::minutes(60));
        assert_eq!(stale_cutoff(now, -5), now);
        assert_eq!(stale_cutoff(now, i64::MAX / 1000), Timestamp::MIN_UTC);
        assert_eq!(stale_cutoff(now, i64::MAX), Timestamp::MIN_UTC);

        let mut entry = CacheEntry::new(snapshot(TenantStatus::Active), now);
        entry.last_synced_at = Some(now - Duration::days(3650));
        assert!(!entry.is_stale(stale_cutoff(now, i64::MAX)));
        entry.last_synced_at = None;
        assert!(entry.is_stale(stale_cutoff(now, i64::MAX)));
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(60);

        let fresh = CacheEntry::new(snapshot(TenantStatus::Active), now);
        assert!(!fresh.is_stale(cutoff));

        let mut old = fresh.clone();
        old.last_synced_at = Some(now - Duration::minutes(61));
        assert!(old.is_stale(cutoff));

        let mut never = fresh.clone();
        never.last_synced_at = None;
        assert!(never.is_stale(cutoff));

        let mut boundary = fresh;
        boundary.last_synced_at = Some(cutoff);
        assert!(!boundary.is_stale(cutoff));
    }

    #[test]
    fn test_touch_updates_bookkeeping_only() {
        let created = Utc::now() - Duration::minutes(5);
        let mut entry = CacheEntry::new(snapshot(TenantStatus::Active), created);
        let now = Utc::now();
        entry.touch(now);
        assert_eq!(entry.last_synced_at, Some(now));
        assert_eq!(entry.cache_updated_at, now);
        assert_eq!(entry.cache_created_at, created);
    }
}
