//! Tenant Cache Test Utilities
//!
//! Centralized test infrastructure for the tenant cache workspace:
//! - Proptest generators for ids, enums, snapshots and per-tenant event histories
//! - Test fixtures for common tenants and lifecycle events
//! - Custom assertions for cache-specific validation

// Re-export the in-memory store from its source crate
pub use tenant_cache_storage::{InMemoryTenantStore, TenantCacheStore};

// Re-export core types for convenience
pub use tenant_cache_core::{
    CacheEntry, CacheResult, EventError, FailMode, SourceVersion, StorageError,
    SubscriptionPlan, TenantCacheConfig, TenantCacheError, TenantEvent, TenantEventType, TenantId,
    TenantSnapshot, TenantStatus, TenantType, Timestamp,
};

use chrono::Utc;
use uuid::Uuid;

/// Status an event leaves behind when it is the newest one applied.
///
/// Status events and DELETED force a status; CREATED and UPDATED carry one.
pub fn implied_status(event: &TenantEvent) -> Option<TenantStatus> {
    event.event_type.forced_status().or(event.payload.status)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating tenant cache types.

    use super::*;
    use proptest::prelude::*;

    const STATUS_EVENTS: &[TenantEventType] = &[
        TenantEventType::Suspended,
        TenantEventType::Activated,
        TenantEventType::Expired,
    ];

    // === Identity Type Generators ===

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        arb_uuid().prop_map(TenantId::new)
    }

    pub fn arb_source_version() -> impl Strategy<Value = SourceVersion> {
        (0u64..1_000_000).prop_map(SourceVersion::new)
    }

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    // === Enum Generators ===

    pub fn arb_tenant_status() -> impl Strategy<Value = TenantStatus> {
        prop::sample::select(TenantStatus::ALL)
    }

    pub fn arb_tenant_type() -> impl Strategy<Value = TenantType> {
        prop::sample::select(TenantType::ALL)
    }

    pub fn arb_subscription_plan() -> impl Strategy<Value = SubscriptionPlan> {
        prop::sample::select(SubscriptionPlan::ALL)
    }

    pub fn arb_event_type() -> impl Strategy<Value = TenantEventType> {
        prop::sample::select(TenantEventType::ALL)
    }

    /// SUSPENDED, ACTIVATED or EXPIRED.
    pub fn arb_status_event_type() -> impl Strategy<Value = TenantEventType> {
        prop::sample::select(STATUS_EVENTS)
    }

    // === Snapshot Generators ===

    pub fn arb_tenant_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,10}){0,2}"
    }

    /// Generate a live snapshot. Slugs embed the tenant id so generated
    /// tenants never collide on the slug index.
    pub fn arb_snapshot() -> impl Strategy<Value = TenantSnapshot> {
        (arb_tenant_id(), arb_source_version())
            .prop_flat_map(|(tenant_id, version)| arb_snapshot_for(tenant_id, version))
    }

    pub fn arb_snapshot_for(
        tenant_id: TenantId,
        source_version: SourceVersion,
    ) -> impl Strategy<Value = TenantSnapshot> {
        (
            arb_tenant_name(),
            "[a-z]{3,12}",
            arb_tenant_type(),
            arb_tenant_status(),
            arb_subscription_plan(),
        )
            .prop_map(move |(name, slug_base, tenant_type, status, subscription_plan)| {
                TenantSnapshot {
                    tenant_id,
                    name,
                    slug: format!("{slug_base}-{tenant_id}"),
                    tenant_type,
                    status,
                    subscription_plan,
                    deleted_at: None,
                    source_version,
                }
            })
    }

    /// Generate a cache entry, synced at an arbitrary instant or never.
    pub fn arb_cache_entry() -> impl Strategy<Value = CacheEntry> {
        (arb_snapshot(), arb_timestamp(), any::<bool>()).prop_map(|(snapshot, at, synced)| {
            let mut entry = CacheEntry::new(snapshot, at);
            if !synced {
                entry.last_synced_at = None;
            }
            entry
        })
    }

    // === Event Generators ===

    /// Generate an event of any type for one tenant and version.
    ///
    /// Every event carries a complete payload, so it can create the row on
    /// first sighting no matter what arrived before it.
    pub fn arb_event_for(
        tenant_id: TenantId,
        source_version: SourceVersion,
    ) -> impl Strategy<Value = TenantEvent> {
        (arb_event_type(), arb_snapshot_for(tenant_id, source_version))
            .prop_map(|(event_type, snapshot)| TenantEvent::from_snapshot(event_type, &snapshot))
    }

    /// Generate one tenant's history: a CREATED followed by up to
    /// `max_len - 1` events, with strictly increasing versions.
    pub fn arb_event_history(max_len: usize) -> impl Strategy<Value = Vec<TenantEvent>> {
        (
            arb_tenant_id(),
            prop::collection::vec(1u64..5, 1..=max_len.max(1)),
        )
            .prop_flat_map(|(tenant_id, gaps)| {
                let mut version = 0u64;
                gaps.into_iter()
                    .map(|gap| {
                        version += gap;
                        arb_event_for(tenant_id, SourceVersion::new(version)).boxed()
                    })
                    .collect::<Vec<_>>()
            })
            .prop_map(|mut events| {
                if let Some(first) = events.first_mut() {
                    first.event_type = TenantEventType::Created;
                }
                events
            })
    }

    /// Histories for several distinct tenants.
    pub fn arb_tenant_histories(
        tenants: std::ops::Range<usize>,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<Vec<TenantEvent>>> {
        prop::collection::vec(arb_event_history(max_len), tenants)
    }

    /// Deliver `history` out of order with duplicates: every event at least
    /// once, up to `history.len()` extra copies, shuffled.
    pub fn arb_redelivery(history: Vec<TenantEvent>) -> impl Strategy<Value = Vec<TenantEvent>> {
        let n = history.len();
        prop::collection::vec(0..n.max(1), 0..=n).prop_flat_map(move |extra| {
            let mut delivered = history.clone();
            delivered.extend(extra.into_iter().filter_map(|i| history.get(i).cloned()));
            Just(delivered).prop_shuffle()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::path::Path;

    /// A live snapshot with a slug derived from the tenant id.
    pub fn snapshot(tenant_id: TenantId, status: TenantStatus, version: u64) -> TenantSnapshot {
        TenantSnapshot {
            tenant_id,
            name: "Harbor View Inn".to_string(),
            slug: format!("harbor-view-{tenant_id}"),
            tenant_type: TenantType::Hotel,
            status,
            subscription_plan: SubscriptionPlan::Basic,
            deleted_at: None,
            source_version: SourceVersion::new(version),
        }
    }

    /// A fresh TRIAL tenant at version 1.
    pub fn trial_snapshot() -> TenantSnapshot {
        snapshot(TenantId::now_v7(), TenantStatus::Trial, 1)
    }

    pub fn created_event(tenant_id: TenantId, status: TenantStatus, version: u64) -> TenantEvent {
        TenantEvent::from_snapshot(
            TenantEventType::Created,
            &snapshot(tenant_id, status, version),
        )
    }

    /// A full-snapshot UPDATED that renames the tenant.
    pub fn updated_event(
        tenant_id: TenantId,
        name: &str,
        status: TenantStatus,
        version: u64,
    ) -> TenantEvent {
        let mut snapshot = snapshot(tenant_id, status, version);
        snapshot.name = name.to_string();
        TenantEvent::from_snapshot(TenantEventType::Updated, &snapshot)
    }

    pub fn suspended_event(tenant_id: TenantId, version: u64) -> TenantEvent {
        TenantEvent::transition(
            tenant_id,
            TenantEventType::Suspended,
            SourceVersion::new(version),
        )
    }

    pub fn activated_event(tenant_id: TenantId, version: u64) -> TenantEvent {
        TenantEvent::transition(
            tenant_id,
            TenantEventType::Activated,
            SourceVersion::new(version),
        )
    }

    pub fn expired_event(tenant_id: TenantId, version: u64) -> TenantEvent {
        TenantEvent::transition(
            tenant_id,
            TenantEventType::Expired,
            SourceVersion::new(version),
        )
    }

    /// A DELETED without an explicit timestamp.
    pub fn deleted_event(tenant_id: TenantId, version: u64) -> TenantEvent {
        TenantEvent::deleted(tenant_id, SourceVersion::new(version), None)
    }

    /// Wire bytes for an event.
    pub fn encode(event: &TenantEvent) -> Vec<u8> {
        event.encode().expect("fixture events always encode")
    }

    /// A persisted-looking entry with the given sync time.
    pub fn cache_entry(status: TenantStatus, last_synced_at: Option<Timestamp>) -> CacheEntry {
        let mut entry = CacheEntry::new(trial_snapshot(), Utc::now());
        entry.snapshot.status = status;
        entry.last_synced_at = last_synced_at;
        entry
    }

    /// Config rooted at `store_path` with short test intervals.
    pub fn test_config(store_path: &Path) -> TenantCacheConfig {
        let mut config = TenantCacheConfig::default();
        config.store.path = store_path.to_path_buf();
        config.store.map_size_mb = 16;
        config.sync.poll_idle_ms = 5;
        config.monitor.check_interval_secs = 1;
        config
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion functions for tenant cache validation.

    use super::*;

    /// Assert that a CacheResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a CacheResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_version_conflict<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(TenantCacheError::Storage(StorageError::VersionConflict { .. })) => {}
            other => panic!("Expected VersionConflict, got: {:?}", other),
        }
    }

    /// Assert a non-retryable event error.
    #[track_caller]
    pub fn assert_event_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e @ TenantCacheError::Event(_)) => {
                assert!(!e.is_retryable(), "Event errors must not be retryable");
            }
            other => panic!("Expected Event error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_missing_snapshot<T: std::fmt::Debug>(result: &CacheResult<T>, tenant_id: TenantId) {
        match result {
            Err(TenantCacheError::Event(EventError::MissingSnapshot { tenant_id: id, .. })) => {
                assert_eq!(*id, tenant_id, "Wrong tenant in MissingSnapshot error");
            }
            other => panic!("Expected MissingSnapshot for {}, got: {:?}", tenant_id, other),
        }
    }

    /// Assert the entry mirrors `expected` field for field.
    #[track_caller]
    pub fn assert_mirrors(entry: &CacheEntry, expected: &TenantSnapshot) {
        assert_eq!(&entry.snapshot, expected, "Cache entry diverged from snapshot");
    }

    #[track_caller]
    pub fn assert_version(entry: &CacheEntry, version: u64) {
        assert_eq!(
            entry.source_version(),
            SourceVersion::new(version),
            "Unexpected source version for tenant {}",
            entry.tenant_id()
        );
    }

    /// Assert the entry is soft-deleted and therefore not operational.
    #[track_caller]
    pub fn assert_tombstone(entry: &CacheEntry) {
        assert!(
            entry.is_deleted(),
            "Expected tenant {} to be deleted",
            entry.tenant_id()
        );
        assert!(!entry.is_operational());
        assert!(!entry.is_active());
    }

    /// Assert bookkeeping timestamps are consistent.
    #[track_caller]
    pub fn assert_bookkeeping_valid(entry: &CacheEntry) {
        assert!(
            entry.cache_updated_at >= entry.cache_created_at,
            "cache_updated_at precedes cache_created_at"
        );
        assert!(entry.row_version > 0, "Persisted entries have a row version");
    }
}

// ============================================================================
// TESTS
// ============================================================================
