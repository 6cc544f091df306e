//! Gate policies, fail modes and the separation between staleness and
//! authorization.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tenant_cache_core::{FailMode, GateConfig, TenantId, TenantStatus};
use tenant_cache_storage::TenantCacheStore;
use tenant_cache_sync::{
    AuthorizationGate, BasePolicy, CacheSynchronizer, DenyReason, ExcludeTrial, GateDecision,
    GatePolicy, PolicyGate, RequireStatus, StalenessMonitor,
};
use tenant_cache_test_utils::fixtures;

#[path = "support/flaky_store.rs"]
mod flaky_store;
use flaky_store::FlakyStore;

async fn seeded() -> (Arc<FlakyStore>, TenantId, TenantId) {
    let store = Arc::new(FlakyStore::new());
    let synchronizer = CacheSynchronizer::new(store.clone());
    let trial = TenantId::now_v7();
    let active = TenantId::now_v7();
    synchronizer
        .apply_event(&fixtures::created_event(trial, TenantStatus::Trial, 1))
        .await
        .expect("apply");
    synchronizer
        .apply_event(&fixtures::created_event(active, TenantStatus::Active, 1))
        .await
        .expect("apply");
    (store, trial, active)
}

#[tokio::test]
async fn fail_closed_denies_on_store_fault() {
    let (store, _trial, active) = seeded().await;
    let gate = PolicyGate::from_config(
        AuthorizationGate::new(store.clone()),
        BasePolicy,
        &GateConfig {
            fail_mode: FailMode::Closed,
        },
    );
    assert!(gate.authorize(active).await);

    store.fail_reads(true);
    assert!(!gate.authorize(active).await);
    assert!(gate.decide(active).await.is_err());
}

#[tokio::test]
async fn fail_open_allows_on_store_fault_only() {
    let (store, trial, _active) = seeded().await;
    let gate = PolicyGate::new(AuthorizationGate::new(store.clone()), BasePolicy)
        .with_fail_mode(FailMode::Open);

    // A real deny is still a deny.
    assert!(!gate.authorize(TenantId::now_v7()).await);

    store.fail_reads(true);
    assert!(gate.authorize(trial).await);
    assert!(gate.authorize(TenantId::now_v7()).await);
}

#[tokio::test]
async fn base_gate_surfaces_faults_as_errors() {
    let (store, trial, _active) = seeded().await;
    let gate = AuthorizationGate::new(store.clone());
    store.fail_reads(true);

    assert!(gate.can_operate(trial).await.is_err());
    assert!(gate.is_operational(trial).await.is_err());
    assert!(gate.is_active(trial).await.is_err());
    assert!(gate.get_cache_entry(trial).await.is_err());
}

#[tokio::test]
async fn refinements_only_narrow_the_base_gate() {
    let (store, trial, active) = seeded().await;
    let synchronizer = CacheSynchronizer::new(store.clone());
    let suspended = TenantId::now_v7();
    synchronizer
        .apply_event(&fixtures::created_event(suspended, TenantStatus::Active, 1))
        .await
        .expect("apply");
    synchronizer
        .apply_event(&fixtures::suspended_event(suspended, 2))
        .await
        .expect("apply");

    let gate = AuthorizationGate::new(store);
    let policies: Vec<Box<dyn GatePolicy>> = vec![
        Box::new(BasePolicy),
        Box::new(ExcludeTrial),
        Box::new(RequireStatus::new(TenantStatus::ALL.iter().copied())),
        Box::new(RequireStatus::new([TenantStatus::Trial])),
    ];
    for policy in &policies {
        for tenant_id in [trial, active, suspended, TenantId::now_v7()] {
            let base = gate.can_operate(tenant_id).await.expect("gate");
            let refined = gate
                .decide_with(tenant_id, &**policy)
                .await
                .expect("gate")
                .is_allowed();
            assert!(
                base || !refined,
                "policy {} widened the gate for {}",
                policy.name(),
                tenant_id
            );
        }
    }

    assert_eq!(
        gate.decide_with(trial, &ExcludeTrial).await.expect("gate"),
        GateDecision::Denied(DenyReason::PolicyRefused {
            status: TenantStatus::Trial
        })
    );
    assert_eq!(
        gate.decide_with(active, &RequireStatus::new([TenantStatus::Trial]))
            .await
            .expect("gate"),
        GateDecision::Denied(DenyReason::PolicyRefused {
            status: TenantStatus::Active
        })
    );
}

#[tokio::test]
async fn staleness_never_changes_authorization() {
    let store = Arc::new(FlakyStore::new());
    let synchronizer = CacheSynchronizer::new(store.clone());
    let tenant_id = TenantId::now_v7();
    synchronizer
        .apply_event_at(
            &fixtures::created_event(tenant_id, TenantStatus::Active, 1),
            Utc::now() - Duration::days(30),
        )
        .await
        .expect("apply");

    let monitor = StalenessMonitor::new(store.clone());
    let stale = monitor.find_stale(60).await.expect("find_stale");
    assert_eq!(stale.len(), 1);

    let gate = AuthorizationGate::new(store.clone());
    assert!(gate.can_operate(tenant_id).await.expect("gate"));
    assert!(gate.is_active(tenant_id).await.expect("gate"));
    assert_eq!(store.count().await.expect("count"), 1);
}
