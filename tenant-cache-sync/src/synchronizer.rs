//! Applies registry events to the local store.
//!
//! The only guard against duplicates and reordering is the per-tenant
//! `source_version`: an event whose version is not strictly greater than the
//! stored one is discarded, whatever its type. Everything else follows from
//! that rule, including deletion precedence: a tombstone written at v2 can
//! never be overwritten by a redelivered v1.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tenant_cache_core::{
    CacheEntry, CacheResult, EventError, SourceVersion, SyncConfig, TenantEvent, TenantEventType,
    TenantSnapshot, TenantStatus, Timestamp, DEFAULT_MAX_CONFLICT_RETRIES,
};
use tenant_cache_storage::TenantCacheStore;

/// What `apply_event` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First sighting of the tenant created the entry.
    Created,
    /// A full snapshot replaced the stored one.
    Updated,
    StatusChanged {
        from: TenantStatus,
        to: TenantStatus,
    },
    /// The entry was tombstoned (or created as one).
    Deleted,
    /// The stored version already covers this event. Nothing was written.
    Discarded {
        stored: SourceVersion,
        incoming: SourceVersion,
    },
}

impl ApplyOutcome {
    pub fn is_discarded(&self) -> bool {
        matches!(self, ApplyOutcome::Discarded { .. })
    }
}

/// Result of planning an event against the current row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Plan {
    Discard { stored: SourceVersion },
    Write { entry: CacheEntry, outcome: ApplyOutcome },
}

/// Compute the next state of a row for `event`, without touching the store.
pub(crate) fn plan(
    current: Option<&CacheEntry>,
    event: &TenantEvent,
    now: Timestamp,
) -> Result<Plan, EventError> {
    match current {
        Some(stored) if !event.source_version.supersedes(stored.source_version()) => {
            Ok(Plan::Discard {
                stored: stored.source_version(),
            })
        }
        Some(stored) => Ok(plan_existing(stored, event, now)),
        None => plan_first_sighting(event, now),
    }
}

fn plan_existing(stored: &CacheEntry, event: &TenantEvent, now: Timestamp) -> Plan {
    let mut entry = stored.clone();
    let from = stored.status();
    let outcome = match event.event_type {
        TenantEventType::Created | TenantEventType::Updated => {
            let payload = &event.payload;
            // Absent fields keep their stored value.
            let snapshot = &mut entry.snapshot;
            if let Some(name) = &payload.name {
                snapshot.name = name.clone();
            }
            if let Some(slug) = &payload.slug {
                snapshot.slug = slug.clone();
            }
            snapshot.tenant_type = payload.tenant_type.unwrap_or(snapshot.tenant_type);
            snapshot.status = payload.status.unwrap_or(snapshot.status);
            snapshot.subscription_plan = payload
                .subscription_plan
                .unwrap_or(snapshot.subscription_plan);
            ApplyOutcome::Updated
        }
        TenantEventType::Suspended | TenantEventType::Activated | TenantEventType::Expired => {
            let to = event.event_type.forced_status().unwrap_or(from);
            entry.snapshot.status = to;
            ApplyOutcome::StatusChanged { from, to }
        }
        TenantEventType::Deleted => {
            entry.snapshot.status = TenantStatus::Cancelled;
            entry.snapshot.deleted_at = Some(event.deleted_at.unwrap_or(now));
            ApplyOutcome::Deleted
        }
    };
    // A tombstone is terminal: later events never clear or move it.
    if stored.snapshot.deleted_at.is_some() {
        entry.snapshot.deleted_at = stored.snapshot.deleted_at;
    }
    entry.snapshot.source_version = event.source_version;
    entry.touch(now);
    Plan::Write { entry, outcome }
}

fn plan_first_sighting(event: &TenantEvent, now: Timestamp) -> Result<Plan, EventError> {
    let tenant_id = event.tenant_id;
    let version = event.source_version;
    let (snapshot, outcome) = match event.event_type {
        TenantEventType::Created | TenantEventType::Updated => {
            let snapshot = event.payload.to_snapshot(tenant_id, None, version).ok_or_else(|| {
                EventError::MissingField {
                    event_type: event.event_type.to_string(),
                    field: event.payload.first_missing_field().unwrap_or("payload"),
                }
            })?;
            (snapshot, ApplyOutcome::Created)
        }
        TenantEventType::Suspended | TenantEventType::Activated | TenantEventType::Expired => {
            let mut snapshot = event
                .payload
                .to_snapshot(tenant_id, None, version)
                .ok_or_else(|| EventError::MissingSnapshot {
                    tenant_id,
                    event_type: event.event_type.to_string(),
                    source_version: version,
                })?;
            if let Some(forced) = event.event_type.forced_status() {
                snapshot.status = forced;
            }
            (snapshot, ApplyOutcome::Created)
        }
        TenantEventType::Deleted => {
            let payload = &event.payload;
            let snapshot = TenantSnapshot {
                tenant_id,
                name: payload.name.clone().unwrap_or_default(),
                slug: payload.slug.clone().unwrap_or_default(),
                tenant_type: payload.tenant_type.unwrap_or_default(),
                status: TenantStatus::Cancelled,
                subscription_plan: payload.subscription_plan.unwrap_or_default(),
                deleted_at: Some(event.deleted_at.unwrap_or(now)),
                source_version: version,
            };
            (snapshot, ApplyOutcome::Deleted)
        }
    };
    Ok(Plan::Write {
        entry: CacheEntry::new(snapshot, now),
        outcome,
    })
}

/// Applies decoded events to a store with optimistic conflict retries.
///
/// Holds no state of its own beyond a conflict counter; any number of
/// synchronizers may share one store.
pub struct CacheSynchronizer<S: TenantCacheStore> {
    store: Arc<S>,
    max_conflict_retries: u32,
    conflicts: AtomicU64,
}

impl<S: TenantCacheStore> CacheSynchronizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn from_config(store: Arc<S>, config: &SyncConfig) -> Self {
        Self::new(store).with_max_conflict_retries(config.max_conflict_retries)
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Optimistic-lock conflicts observed since construction.
    pub fn conflicts_seen(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Apply `event` using the wall clock for `lastSyncedAt`.
    pub async fn apply_event(&self, event: &TenantEvent) -> CacheResult<ApplyOutcome> {
        self.apply_event_at(event, Utc::now()).await
    }

    /// Apply `event` as of `now`.
    ///
    /// Store failures and exhausted conflict retries propagate unchanged; the
    /// caller must leave the event unacknowledged so the channel redelivers it.
    pub async fn apply_event_at(
        &self,
        event: &TenantEvent,
        now: Timestamp,
    ) -> CacheResult<ApplyOutcome> {
        let tenant_id = event.tenant_id;
        let mut attempt: u32 = 0;
        loop {
            let current = self.store.get(tenant_id).await?;
            let expected = current.as_ref().map(|c| c.row_version);

            let (entry, outcome) = match plan(current.as_ref(), event, now)? {
                Plan::Discard { stored } => {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        event_type = %event.event_type,
                        stored_version = %stored,
                        incoming_version = %event.source_version,
                        "Discarding superseded tenant event"
                    );
                    return Ok(ApplyOutcome::Discarded {
                        stored,
                        incoming: event.source_version,
                    });
                }
                Plan::Write { entry, outcome } => (entry, outcome),
            };

            match self.store.save(entry, expected).await {
                Ok(saved) => {
                    log_applied(event, &saved, outcome);
                    return Ok(outcome);
                }
                Err(e) if e.is_version_conflict() => {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                    if attempt >= self.max_conflict_retries {
                        tracing::warn!(
                            tenant_id = %tenant_id,
                            attempts = attempt + 1,
                            "Optimistic lock conflicts exhausted retries"
                        );
                        return Err(e);
                    }
                    attempt += 1;
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        attempt,
                        max_retries = self.max_conflict_retries,
                        "Optimistic lock conflict, re-reading tenant row"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn log_applied(event: &TenantEvent, saved: &CacheEntry, outcome: ApplyOutcome) {
    match outcome {
        ApplyOutcome::StatusChanged { from, to } => tracing::info!(
            tenant_id = %saved.tenant_id(),
            event_type = %event.event_type,
            source_version = %saved.source_version(),
            from = %from,
            to = %to,
            "Tenant status changed"
        ),
        ApplyOutcome::Deleted => tracing::info!(
            tenant_id = %saved.tenant_id(),
            source_version = %saved.source_version(),
            deleted_at = ?saved.snapshot.deleted_at,
            "Tenant tombstoned"
        ),
        _ => tracing::info!(
            tenant_id = %saved.tenant_id(),
            event_type = %event.event_type,
            source_version = %saved.source_version(),
            status = %saved.status(),
            outcome = ?outcome,
            "Tenant cache entry written"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use tenant_cache_core::{
        StorageError, SubscriptionPlan, TenantCacheError, TenantId, TenantType,
    };
    use tenant_cache_storage::{InMemoryTenantStore, StoreStats};

    fn snapshot(tenant_id: TenantId, status: TenantStatus, version: u64) -> TenantSnapshot {
        TenantSnapshot {
            tenant_id,
            name: "Alpine Lodge".to_string(),
            slug: "alpine-lodge".to_string(),
            tenant_type: TenantType::Resort,
            status,
            subscription_plan: SubscriptionPlan::Basic,
            deleted_at: None,
            source_version: SourceVersion::new(version),
        }
    }

    fn created(tenant_id: TenantId, status: TenantStatus, version: u64) -> TenantEvent {
        TenantEvent::from_snapshot(
            TenantEventType::Created,
            &snapshot(tenant_id, status, version),
        )
    }

    #[test]
    fn test_plan_discards_equal_and_older_versions() {
        let now = Utc::now();
        let tenant_id = TenantId::now_v7();
        let stored = CacheEntry::new(snapshot(tenant_id, TenantStatus::Active, 5), now);

        for version in [1, 5] {
            let event = TenantEvent::transition(
                tenant_id,
                TenantEventType::Suspended,
                SourceVersion::new(version),
            );
            assert_eq!(
                plan(Some(&stored), &event, now),
                Ok(Plan::Discard {
                    stored: SourceVersion::new(5)
                })
            );
        }
    }

    #[test]
    fn test_plan_status_event_touches_only_status() {
        let created_at = Utc::now() - Duration::hours(1);
        let now = Utc::now();
        let tenant_id = TenantId::now_v7();
        let stored = CacheEntry::new(snapshot(tenant_id, TenantStatus::Active, 1), created_at);
        let mut event =
            TenantEvent::transition(tenant_id, TenantEventType::Suspended, SourceVersion::new(2));
        event.payload.name = Some("Renamed Lodge".to_string());

        let Ok(Plan::Write { entry, outcome }) = plan(Some(&stored), &event, now) else {
            panic!("expected a write");
        };
        assert_eq!(
            outcome,
            ApplyOutcome::StatusChanged {
                from: TenantStatus::Active,
                to: TenantStatus::Suspended
            }
        );
        assert_eq!(entry.snapshot.name, "Alpine Lodge");
        assert_eq!(entry.status(), TenantStatus::Suspended);
        assert_eq!(entry.source_version(), SourceVersion::new(2));
        assert_eq!(entry.last_synced_at, Some(now));
        assert_eq!(entry.cache_created_at, created_at);
    }

    #[test]
    fn test_plan_deleted_defaults_to_now_and_cancels() {
        let now = Utc::now();
        let tenant_id = TenantId::now_v7();
        let stored = CacheEntry::new(snapshot(tenant_id, TenantStatus::Active, 1), now);
        let event = TenantEvent::deleted(tenant_id, SourceVersion::new(2), None);

        let Ok(Plan::Write { entry, outcome }) = plan(Some(&stored), &event, now) else {
            panic!("expected a write");
        };
        assert_eq!(outcome, ApplyOutcome::Deleted);
        assert_eq!(entry.snapshot.deleted_at, Some(now));
        assert_eq!(entry.status(), TenantStatus::Cancelled);
    }

    #[test]
    fn test_plan_preserves_tombstone_across_later_events() {
        let now = Utc::now();
        let deleted_at = now - Duration::days(2);
        let tenant_id = TenantId::now_v7();
        let mut stored = CacheEntry::new(snapshot(tenant_id, TenantStatus::Cancelled, 2), now);
        stored.snapshot.deleted_at = Some(deleted_at);

        let update = TenantEvent::from_snapshot(
            TenantEventType::Updated,
            &snapshot(tenant_id, TenantStatus::Active, 3),
        );
        let Ok(Plan::Write { entry, .. }) = plan(Some(&stored), &update, now) else {
            panic!("expected a write");
        };
        assert_eq!(entry.snapshot.deleted_at, Some(deleted_at));
        assert!(!entry.is_operational());

        let redelete = TenantEvent::deleted(tenant_id, SourceVersion::new(4), Some(now));
        let Ok(Plan::Write { entry, .. }) = plan(Some(&stored), &redelete, now) else {
            panic!("expected a write");
        };
        assert_eq!(entry.snapshot.deleted_at, Some(deleted_at));
    }

    #[test]
    fn test_plan_unknown_tenant_partial_status_event_is_missing_snapshot() {
        let tenant_id = TenantId::now_v7();
        let event =
            TenantEvent::transition(tenant_id, TenantEventType::Activated, SourceVersion::new(4));
        assert_eq!(
            plan(None, &event, Utc::now()),
            Err(EventError::MissingSnapshot {
                tenant_id,
                event_type: "ACTIVATED".to_string(),
                source_version: SourceVersion::new(4),
            })
        );
    }

    #[test]
    fn test_plan_unknown_tenant_complete_status_event_forces_status() {
        let tenant_id = TenantId::now_v7();
        let event = TenantEvent::from_snapshot(
            TenantEventType::Suspended,
            &snapshot(tenant_id, TenantStatus::Active, 3),
        );

        let Ok(Plan::Write { entry, outcome }) = plan(None, &event, Utc::now()) else {
            panic!("expected a write");
        };
        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(entry.status(), TenantStatus::Suspended);
    }

    #[test]
    fn test_plan_unknown_tenant_partial_delete_creates_tombstone() {
        let now = Utc::now();
        let tenant_id = TenantId::now_v7();
        let event = TenantEvent::deleted(tenant_id, SourceVersion::new(9), None);

        let Ok(Plan::Write { entry, outcome }) = plan(None, &event, now) else {
            panic!("expected a write");
        };
        assert_eq!(outcome, ApplyOutcome::Deleted);
        assert!(entry.is_deleted());
        assert_eq!(entry.slug(), "");
        assert_eq!(entry.status(), TenantStatus::Cancelled);
        assert_eq!(entry.row_version, 0);
    }

    #[tokio::test]
    async fn test_apply_created_then_duplicate() {
        let store = Arc::new(InMemoryTenantStore::new());
        let sync = CacheSynchronizer::new(store.clone());
        let tenant_id = TenantId::now_v7();
        let event = created(tenant_id, TenantStatus::Trial, 1);

        assert_eq!(
            sync.apply_event(&event).await.expect("apply"),
            ApplyOutcome::Created
        );
        let first = store.get(tenant_id).await.expect("get").expect("entry");

        let again = sync.apply_event(&event).await.expect("apply duplicate");
        assert!(again.is_discarded());
        let second = store.get(tenant_id).await.expect("get").expect("entry");
        assert_eq!(first, second);
    }

    /// Store wrapper that loses the race for the first `n` saves.
    struct RacingStore {
        inner: InMemoryTenantStore,
        remaining_conflicts: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl TenantCacheStore for RacingStore {
        async fn get(&self, tenant_id: TenantId) -> CacheResult<Option<CacheEntry>> {
            self.inner.get(tenant_id).await
        }

        async fn save(&self, entry: CacheEntry, expected: Option<u64>) -> CacheResult<CacheEntry> {
            let lose = self
                .remaining_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Err(TenantCacheError::Storage(StorageError::VersionConflict {
                    tenant_id: entry.tenant_id(),
                    expected,
                    actual: Some(99),
                }));
            }
            self.inner.save(entry, expected).await
        }

        async fn find_by_slug(&self, slug: &str) -> CacheResult<Option<CacheEntry>> {
            self.inner.find_by_slug(slug).await
        }

        async fn list_by_status(&self, status: TenantStatus) -> CacheResult<Vec<CacheEntry>> {
            self.inner.list_by_status(status).await
        }

        async fn list_stale(&self, cutoff: Timestamp) -> CacheResult<Vec<CacheEntry>> {
            self.inner.list_stale(cutoff).await
        }

        async fn count(&self) -> CacheResult<u64> {
            self.inner.count().await
        }

        async fn stats(&self) -> CacheResult<StoreStats> {
            self.inner.stats().await
        }
    }

    fn racing_store(conflicts: u32) -> Arc<RacingStore> {
        Arc::new(RacingStore {
            inner: InMemoryTenantStore::new(),
            remaining_conflicts: std::sync::atomic::AtomicU32::new(conflicts),
        })
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let store = racing_store(2);
        let sync = CacheSynchronizer::new(store.clone()).with_max_conflict_retries(3);
        let tenant_id = TenantId::now_v7();

        let outcome = sync
            .apply_event(&created(tenant_id, TenantStatus::Active, 1))
            .await
            .expect("apply should succeed after retries");
        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(sync.conflicts_seen(), 2);
        assert!(store.get(tenant_id).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_exhausted_conflicts_propagate() {
        let store = racing_store(10);
        let sync = CacheSynchronizer::new(store.clone()).with_max_conflict_retries(2);
        let tenant_id = TenantId::now_v7();

        let err = sync
            .apply_event(&created(tenant_id, TenantStatus::Active, 1))
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
        assert!(err.is_retryable());
        assert_eq!(sync.conflicts_seen(), 3);
        assert!(store.get(tenant_id).await.expect("get").is_none());
    }
}
