//! Staleness Monitor Background Task
//!
//! Periodically looks for cache entries that have not absorbed an event
//! within the configured threshold and logs them for alerting. An entry
//! that was never synced counts as stale.
//!
//! The monitor is read-only. Staleness never changes a gate decision; a
//! stale ACTIVE tenant stays operational until an event says otherwise.
//!
//! # Configuration
//!
//! The task reads [`MonitorConfig`]:
//!
//! ```rust
//! use tenant_cache_core::MonitorConfig;
//!
//! let config = MonitorConfig {
//!     check_interval_secs: 300,     // Check every five minutes
//!     stale_threshold_minutes: 60,  // Alert after an hour without events
//!     max_reported: 50,             // Per-tenant warnings per cycle
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tenant_cache_core::{stale_cutoff, CacheEntry, CacheResult, MonitorConfig, Timestamp};
use tenant_cache_storage::TenantCacheStore;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// MONITOR
// ============================================================================

pub struct StalenessMonitor<S: TenantCacheStore> {
    store: Arc<S>,
}

impl<S: TenantCacheStore> StalenessMonitor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Entries whose `last_synced_at` is unset or older than
    /// `threshold_minutes` ago.
    pub async fn find_stale(&self, threshold_minutes: i64) -> CacheResult<Vec<CacheEntry>> {
        self.find_stale_at(threshold_minutes, Utc::now()).await
    }

    pub async fn find_stale_at(
        &self,
        threshold_minutes: i64,
        now: Timestamp,
    ) -> CacheResult<Vec<CacheEntry>> {
        self.store
            .list_stale(stale_cutoff(now, threshold_minutes))
            .await
    }

    /// Run one check and log the result. Returns the number of stale
    /// entries found.
    pub async fn run_cycle(&self, config: &MonitorConfig) -> CacheResult<usize> {
        let stale = self.find_stale(config.stale_threshold_minutes).await?;

        for entry in stale.iter().take(config.max_reported) {
            tracing::warn!(
                tenant_id = %entry.tenant_id(),
                slug = %entry.slug(),
                status = %entry.status(),
                source_version = %entry.source_version(),
                last_synced_at = ?entry.last_synced_at,
                "Tenant cache entry is stale"
            );
        }

        if stale.is_empty() {
            tracing::trace!("Staleness check found no stale tenants");
        } else {
            tracing::info!(
                stale = stale.len(),
                reported = stale.len().min(config.max_reported),
                threshold_minutes = config.stale_threshold_minutes,
                "Staleness check completed"
            );
        }
        Ok(stale.len())
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct StalenessMetrics {
    /// Checks completed since startup.
    pub cycles: AtomicU64,
    /// Stale entries seen, summed over all cycles.
    pub stale_seen: AtomicU64,
    pub errors: AtomicU64,
}

impl StalenessMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StalenessSnapshot {
        StalenessSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            stale_seen: self.stale_seen.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StalenessSnapshot {
    pub cycles: u64,
    pub stale_seen: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Check for stale entries every `config.check_interval()` until the
/// shutdown signal is received.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let monitor = StalenessMonitor::new(store.clone());
/// let handle = tokio::spawn(staleness_monitor_task(monitor, config.monitor, shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn staleness_monitor_task<S: TenantCacheStore>(
    monitor: StalenessMonitor<S>,
    config: MonitorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<StalenessMetrics> {
    let metrics = Arc::new(StalenessMetrics::new());

    let mut check_interval = interval(config.check_interval());
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval_secs,
        stale_threshold_minutes = config.stale_threshold_minutes,
        "Staleness monitor started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Staleness monitor shutting down");
                    break;
                }
            }

            _ = check_interval.tick() => {
                metrics.cycles.fetch_add(1, Ordering::Relaxed);
                match monitor.run_cycle(&config).await {
                    Ok(found) => {
                        metrics.stale_seen.fetch_add(found as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Staleness check failed");
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        stale_seen = snapshot.stale_seen,
        errors = snapshot.errors,
        "Staleness monitor completed"
    );

    metrics
}
