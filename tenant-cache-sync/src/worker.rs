//! Consume loop: poll, decode, apply, then commit, dead-letter or nack.
//!
//! Delivery is at-least-once. A record is committed only after its effect is
//! durable in the store (or it has been handed to the dead-letter sink).
//! Retryable failures are nacked and left to the channel's own redelivery;
//! the worker never retries an event itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tenant_cache_core::{
    CacheResult, EventError, SyncConfig, TenantCacheError, TenantEvent, DEFAULT_POLL_IDLE_MS,
};
use tenant_cache_storage::TenantCacheStore;
use tokio::sync::watch;

use crate::channel::{DeadLetterRecord, DeadLetterSink, Delivery, EventSource};
use crate::synchronizer::{ApplyOutcome, CacheSynchronizer};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the consume loop.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Deliveries polled and handled.
    pub processed: AtomicU64,
    /// Events that changed the store.
    pub applied: AtomicU64,
    /// Events discarded as duplicates or out of order.
    pub discarded: AtomicU64,
    pub dead_lettered: AtomicU64,
    /// Deliveries nacked after a retryable failure.
    pub failed: AtomicU64,
    /// Optimistic-lock conflicts seen by the synchronizer.
    pub conflicts: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub processed: u64,
    pub applied: u64,
    pub discarded: u64,
    pub dead_lettered: u64,
    pub failed: u64,
    pub conflicts: u64,
}

// ============================================================================
// WORKER
// ============================================================================

/// How one delivery was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Committed(ApplyOutcome),
    DeadLettered { reason: String },
    /// Left uncommitted for redelivery.
    Nacked { error: TenantCacheError },
}

pub struct SyncWorker<S, E, D>
where
    S: TenantCacheStore,
    E: EventSource,
    D: DeadLetterSink,
{
    synchronizer: CacheSynchronizer<S>,
    source: Arc<E>,
    dead_letters: Arc<D>,
    poll_idle: Duration,
    metrics: Arc<SyncMetrics>,
}

impl<S, E, D> SyncWorker<S, E, D>
where
    S: TenantCacheStore,
    E: EventSource,
    D: DeadLetterSink,
{
    pub fn new(synchronizer: CacheSynchronizer<S>, source: Arc<E>, dead_letters: Arc<D>) -> Self {
        Self {
            synchronizer,
            source,
            dead_letters,
            poll_idle: Duration::from_millis(DEFAULT_POLL_IDLE_MS),
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    pub fn from_config(
        store: Arc<S>,
        source: Arc<E>,
        dead_letters: Arc<D>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(
            CacheSynchronizer::from_config(store, config),
            source,
            dead_letters,
        )
        .with_poll_idle(config.poll_idle())
    }

    pub fn with_poll_idle(mut self, poll_idle: Duration) -> Self {
        self.poll_idle = poll_idle;
        self
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn synchronizer(&self) -> &CacheSynchronizer<S> {
        &self.synchronizer
    }

    /// Poll one delivery and resolve it. `Ok(None)` when nothing is ready.
    ///
    /// Errors are channel failures (poll, commit or nack); the delivery's
    /// fate is then up to the channel.
    pub async fn process_next(&self) -> CacheResult<Option<DeliveryOutcome>> {
        let Some(delivery) = self.source.poll().await? else {
            return Ok(None);
        };
        self.handle(delivery).await.map(Some)
    }

    /// Process up to `max_deliveries` records, stopping early when idle.
    /// Returns how many were handled.
    pub async fn drain(&self, max_deliveries: usize) -> CacheResult<usize> {
        let mut handled = 0;
        while handled < max_deliveries {
            if self.process_next().await?.is_none() {
                break;
            }
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle(&self, delivery: Delivery) -> CacheResult<DeliveryOutcome> {
        self.metrics.processed.fetch_add(1, Ordering::Relaxed);

        let event = match TenantEvent::decode(&delivery.payload) {
            Ok(event) => event,
            Err(e) => return self.reject(&delivery, e.into()).await,
        };
        if let Some(key) = delivery.key {
            if key != event.partition_key() {
                let mismatch = EventError::PartitionKeyMismatch {
                    key,
                    tenant_id: event.tenant_id,
                };
                return self.reject(&delivery, mismatch.into()).await;
            }
        }

        let applied = self.synchronizer.apply_event(&event).await;
        self.metrics
            .conflicts
            .store(self.synchronizer.conflicts_seen(), Ordering::Relaxed);

        match applied {
            Ok(outcome) => {
                self.source.commit(&delivery).await?;
                if outcome.is_discarded() {
                    self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.metrics.applied.fetch_add(1, Ordering::Relaxed);
                }
                Ok(DeliveryOutcome::Committed(outcome))
            }
            Err(e) if !e.is_retryable() => self.reject(&delivery, e).await,
            Err(e) => {
                tracing::error!(
                    tenant_id = %event.tenant_id,
                    event_type = %event.event_type,
                    source_version = %event.source_version,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Failed to apply tenant event, leaving it uncommitted"
                );
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                self.source.nack(&delivery).await?;
                Ok(DeliveryOutcome::Nacked { error: e })
            }
        }
    }

    /// Route a non-retryable record to the dead-letter sink, then commit it.
    async fn reject(
        &self,
        delivery: &Delivery,
        error: TenantCacheError,
    ) -> CacheResult<DeliveryOutcome> {
        let reason = error.to_string();
        match self
            .dead_letters
            .send(DeadLetterRecord::new(delivery, reason.clone()))
            .await
        {
            Ok(()) => {
                tracing::error!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    key = ?delivery.key,
                    reason = %reason,
                    "Dead-lettered tenant event"
                );
                self.source.commit(delivery).await?;
                self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                Ok(DeliveryOutcome::DeadLettered { reason })
            }
            Err(sink_error) => {
                tracing::error!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    reason = %reason,
                    error = %sink_error,
                    "Dead-letter write failed, leaving event uncommitted"
                );
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                self.source.nack(delivery).await?;
                Ok(DeliveryOutcome::Nacked { error: sink_error })
            }
        }
    }

    /// Consume until the shutdown signal flips to `true`.
    ///
    /// Returns the metrics collected over the worker's lifetime. On restart,
    /// consumption resumes from the channel's last committed offset.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Arc<SyncMetrics> {
        tracing::info!(
            poll_idle_ms = self.poll_idle.as_millis() as u64,
            "Tenant sync worker started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let idle = match self.process_next().await {
                Ok(Some(DeliveryOutcome::Nacked { .. })) => true,
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Event channel error");
                    true
                }
            };
            if idle {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.poll_idle) => {}
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            processed = snapshot.processed,
            applied = snapshot.applied,
            discarded = snapshot.discarded,
            dead_lettered = snapshot.dead_lettered,
            failed = snapshot.failed,
            conflicts = snapshot.conflicts,
            "Tenant sync worker stopped"
        );
        self.metrics
    }
}
