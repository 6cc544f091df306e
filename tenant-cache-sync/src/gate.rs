//! Authorization gate: pure reads against the local store.
//!
//! The gate never calls the registry. An unknown tenant is denied, and so is
//! a deleted or inactive one; [`GateDecision`] keeps the reasons apart for
//! diagnostics while the boolean answers stay identical.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tenant_cache_core::{
    stale_cutoff, CacheEntry, CacheResult, FailMode, GateConfig, TenantId, TenantStatus,
    Timestamp,
};
use tenant_cache_storage::TenantCacheStore;

// ============================================================================
// DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No cache entry has been observed for this tenant.
    UnknownTenant,
    Deleted { deleted_at: Timestamp },
    /// Status outside ACTIVE and TRIAL.
    Inactive { status: TenantStatus },
    /// Operational, but the caller's policy narrowed it out.
    PolicyRefused { status: TenantStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed { status: TenantStatus },
    Denied(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed { .. })
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            GateDecision::Allowed { .. } => None,
            GateDecision::Denied(reason) => Some(*reason),
        }
    }
}

// ============================================================================
// POLICIES
// ============================================================================

/// A per-service refinement of the base gate.
///
/// Consulted only for entries that already passed the base checks, so a
/// policy can narrow the allowed set but never widen it.
pub trait GatePolicy: Send + Sync {
    fn permits(&self, entry: &CacheEntry) -> bool;

    fn name(&self) -> &'static str;
}

/// Permits every operational tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasePolicy;

impl GatePolicy for BasePolicy {
    fn permits(&self, _entry: &CacheEntry) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "base"
    }
}

/// Refuses TRIAL tenants. Used for payment flows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcludeTrial;

impl GatePolicy for ExcludeTrial {
    fn permits(&self, entry: &CacheEntry) -> bool {
        entry.status() != TenantStatus::Trial
    }

    fn name(&self) -> &'static str {
        "exclude_trial"
    }
}

/// Permits only the listed statuses.
#[derive(Debug, Clone, Default)]
pub struct RequireStatus(pub HashSet<TenantStatus>);

impl RequireStatus {
    pub fn new(statuses: impl IntoIterator<Item = TenantStatus>) -> Self {
        Self(statuses.into_iter().collect())
    }
}

impl GatePolicy for RequireStatus {
    fn permits(&self, entry: &CacheEntry) -> bool {
        self.0.contains(&entry.status())
    }

    fn name(&self) -> &'static str {
        "require_status"
    }
}

// ============================================================================
// GATE
// ============================================================================

/// Read API over the local store.
pub struct AuthorizationGate<S: TenantCacheStore> {
    store: Arc<S>,
}

impl<S: TenantCacheStore> Clone for AuthorizationGate<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TenantCacheStore> AuthorizationGate<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// True iff an entry exists, is not deleted, and is ACTIVE or TRIAL.
    pub async fn can_operate(&self, tenant_id: TenantId) -> CacheResult<bool> {
        Ok(self.decide(tenant_id).await?.is_allowed())
    }

    pub async fn is_operational(&self, tenant_id: TenantId) -> CacheResult<bool> {
        Ok(self
            .store
            .get(tenant_id)
            .await?
            .is_some_and(|entry| entry.is_operational()))
    }

    /// Exactly ACTIVE. TRIAL tenants are operational but not active.
    pub async fn is_active(&self, tenant_id: TenantId) -> CacheResult<bool> {
        Ok(self
            .store
            .get(tenant_id)
            .await?
            .is_some_and(|entry| entry.is_active()))
    }

    pub async fn get_cache_entry(&self, tenant_id: TenantId) -> CacheResult<Option<CacheEntry>> {
        self.store.get(tenant_id).await
    }

    /// Entries never synced or not synced within `threshold_minutes`.
    pub async fn list_stale(&self, threshold_minutes: i64) -> CacheResult<Vec<CacheEntry>> {
        self.store
            .list_stale(stale_cutoff(Utc::now(), threshold_minutes))
            .await
    }

    /// Base decision with diagnostics.
    pub async fn decide(&self, tenant_id: TenantId) -> CacheResult<GateDecision> {
        self.decide_with(tenant_id, &BasePolicy).await
    }

    /// Base decision narrowed by `policy`.
    pub async fn decide_with<P: GatePolicy + ?Sized>(
        &self,
        tenant_id: TenantId,
        policy: &P,
    ) -> CacheResult<GateDecision> {
        let entry = self.store.get(tenant_id).await?;
        Ok(evaluate(entry.as_ref(), policy))
    }
}

fn evaluate<P: GatePolicy + ?Sized>(entry: Option<&CacheEntry>, policy: &P) -> GateDecision {
    let Some(entry) = entry else {
        return GateDecision::Denied(DenyReason::UnknownTenant);
    };
    if let Some(deleted_at) = entry.snapshot.deleted_at {
        return GateDecision::Denied(DenyReason::Deleted { deleted_at });
    }
    let status = entry.status();
    if !status.is_operational() {
        return GateDecision::Denied(DenyReason::Inactive { status });
    }
    if !policy.permits(entry) {
        return GateDecision::Denied(DenyReason::PolicyRefused { status });
    }
    GateDecision::Allowed { status }
}

/// A gate bound to one policy and one fail mode.
///
/// `authorize` never errors: store faults resolve to the fail mode's
/// fallback.
pub struct PolicyGate<S: TenantCacheStore, P: GatePolicy> {
    gate: AuthorizationGate<S>,
    policy: P,
    fail_mode: FailMode,
}

impl<S: TenantCacheStore, P: GatePolicy> PolicyGate<S, P> {
    pub fn new(gate: AuthorizationGate<S>, policy: P) -> Self {
        Self {
            gate,
            policy,
            fail_mode: FailMode::default(),
        }
    }

    pub fn from_config(gate: AuthorizationGate<S>, policy: P, config: &GateConfig) -> Self {
        Self::new(gate, policy).with_fail_mode(config.fail_mode)
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub async fn decide(&self, tenant_id: TenantId) -> CacheResult<GateDecision> {
        self.gate.decide_with(tenant_id, &self.policy).await
    }

    pub async fn authorize(&self, tenant_id: TenantId) -> bool {
        match self.decide(tenant_id).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                let fallback = self.fail_mode.fallback();
                tracing::warn!(
                    tenant_id = %tenant_id,
                    policy = self.policy.name(),
                    fail_mode = ?self.fail_mode,
                    fallback,
                    error = %e,
                    "Gate lookup failed, applying fail mode"
                );
                fallback
            }
        }
    }
}
