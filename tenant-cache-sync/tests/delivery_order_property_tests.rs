//! Property-Based Tests for Delivery Order Safety
//!
//! The channel is at-least-once and only orders events per tenant. For any
//! delivery schedule:
//!
//! - the stored source version never decreases,
//! - the entry converges on the newest event's version and status,
//! - replaying anything already applied changes nothing.

use std::sync::Arc;

use proptest::prelude::*;
use tenant_cache_core::{CacheEntry, SourceVersion, TenantEvent, TenantEventType};
use tenant_cache_storage::{InMemoryTenantStore, TenantCacheStore};
use tenant_cache_sync::{
    CacheSynchronizer, InMemoryDeadLetterSink, InMemoryEventChannel, SyncWorker,
};
use tenant_cache_test_utils::{fixtures, generators, implied_status};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn fail(e: impl std::fmt::Display) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

/// Entry fields that must match regardless of when the event was applied.
/// Deletion instants default to the apply time, so only presence counts.
fn comparable(entry: &CacheEntry) -> impl PartialEq + std::fmt::Debug {
    let s = &entry.snapshot;
    (
        s.tenant_id,
        s.name.clone(),
        s.slug.clone(),
        s.tenant_type,
        s.status,
        s.subscription_plan,
        s.deleted_at.is_some(),
        s.source_version,
    )
}

/// Apply each history in order to a fresh store.
async fn reference_store(
    histories: &[Vec<TenantEvent>],
) -> Result<Arc<InMemoryTenantStore>, TestCaseError> {
    let store = Arc::new(InMemoryTenantStore::new());
    let synchronizer = CacheSynchronizer::new(store.clone());
    for event in histories.iter().flatten() {
        synchronizer.apply_event(event).await.map_err(fail)?;
    }
    Ok(store)
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Shuffled delivery with duplicates converges on the newest event.
    #[test]
    fn prop_out_of_order_duplicates_converge(
        (history, delivered) in generators::arb_event_history(8)
            .prop_flat_map(|h| (Just(h.clone()), generators::arb_redelivery(h)))
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryTenantStore::new());
            let synchronizer = CacheSynchronizer::new(store.clone());
            let tenant_id = history[0].tenant_id;

            let mut last = SourceVersion::ZERO;
            for event in &delivered {
                synchronizer.apply_event(event).await.map_err(fail)?;
                let entry = store
                    .get(tenant_id)
                    .await
                    .map_err(fail)?
                    .ok_or_else(|| TestCaseError::fail("entry missing after apply"))?;
                prop_assert!(
                    entry.source_version() >= last,
                    "version went from {} to {}",
                    last,
                    entry.source_version()
                );
                last = entry.source_version();
            }

            let newest = history.last().ok_or_else(|| TestCaseError::fail("empty history"))?;
            let entry = store
                .get(tenant_id)
                .await
                .map_err(fail)?
                .ok_or_else(|| TestCaseError::fail("entry missing"))?;
            prop_assert_eq!(entry.source_version(), newest.source_version);
            prop_assert_eq!(Some(entry.status()), implied_status(newest));
            if newest.event_type == TenantEventType::Deleted {
                prop_assert!(entry.is_deleted());
            }

            for event in &delivered {
                let outcome = synchronizer.apply_event(event).await.map_err(fail)?;
                prop_assert!(outcome.is_discarded());
            }
            prop_assert_eq!(store.get(tenant_id).await.map_err(fail)?, Some(entry));
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Per-tenant ordered delivery through the channel, followed by a full
    /// replay from offset zero, matches in-order application.
    #[test]
    fn prop_partitioned_replay_matches_in_order_apply(
        histories in generators::arb_tenant_histories(1..5, 6),
        partitions in 1u32..4,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryTenantStore::new());
            let channel = Arc::new(InMemoryEventChannel::new(partitions));
            let sink = Arc::new(InMemoryDeadLetterSink::new());
            let worker = SyncWorker::new(
                CacheSynchronizer::new(store.clone()),
                channel.clone(),
                sink.clone(),
            );

            // Interleave tenants while keeping each tenant's order.
            let longest = histories.iter().map(Vec::len).max().unwrap_or(0);
            for i in 0..longest {
                for history in &histories {
                    if let Some(event) = history.get(i) {
                        channel.publish(event.tenant_id, fixtures::encode(event)).await;
                    }
                }
            }
            let total: usize = histories.iter().map(Vec::len).sum();

            prop_assert_eq!(worker.drain(usize::MAX).await.map_err(fail)?, total);

            // Restart from an older committed offset: everything again.
            for partition in 0..channel.partition_count().await {
                channel.rewind(partition, 0).await.map_err(fail)?;
            }
            prop_assert_eq!(worker.drain(usize::MAX).await.map_err(fail)?, total);

            let metrics = worker.metrics().snapshot();
            prop_assert_eq!(metrics.applied, total as u64);
            prop_assert_eq!(metrics.discarded, total as u64);
            prop_assert_eq!(metrics.dead_lettered, 0);
            prop_assert!(sink.is_empty().await);

            let reference = reference_store(&histories).await?;
            for history in &histories {
                let tenant_id = history[0].tenant_id;
                let got = store.get(tenant_id).await.map_err(fail)?
                    .ok_or_else(|| TestCaseError::fail("entry missing"))?;
                let want = reference.get(tenant_id).await.map_err(fail)?
                    .ok_or_else(|| TestCaseError::fail("reference entry missing"))?;
                prop_assert_eq!(comparable(&got), comparable(&want));
            }
            prop_assert_eq!(store.count().await.map_err(fail)?, histories.len() as u64);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Applying a single event any number of times equals applying it once.
    #[test]
    fn prop_apply_is_idempotent(
        history in generators::arb_event_history(1),
        repeats in 1usize..5,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryTenantStore::new());
            let synchronizer = CacheSynchronizer::new(store.clone());
            let event = &history[0];

            synchronizer.apply_event(event).await.map_err(fail)?;
            let once = store.get(event.tenant_id).await.map_err(fail)?;
            for _ in 0..repeats {
                synchronizer.apply_event(event).await.map_err(fail)?;
            }
            prop_assert_eq!(store.get(event.tenant_id).await.map_err(fail)?, once);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
