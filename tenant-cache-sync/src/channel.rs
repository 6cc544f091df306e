//! Event channel seam: where deliveries come from and where rejects go.
//!
//! The durable log itself (Kafka, Kinesis, ...) lives outside this crate.
//! Adapters implement [`EventSource`]; the consume loop only needs poll,
//! commit and nack. [`InMemoryEventChannel`] is an in-process partitioned
//! log with the same per-key ordering and redelivery guarantees, used by
//! tests and single-process deployments.

use async_trait::async_trait;
use chrono::Utc;
use tenant_cache_core::{CacheResult, ChannelError, TenantId, Timestamp};

/// One record handed out by an [`EventSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub partition: u32,
    pub offset: u64,
    /// Record key. Producers must key every record by its tenant id.
    pub key: Option<TenantId>,
    pub payload: Vec<u8>,
}

/// A partitioned, at-least-once, ordered-per-key event log.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Next record to process, or `None` if nothing is ready.
    async fn poll(&self) -> CacheResult<Option<Delivery>>;

    /// Mark `delivery` and everything before it on its partition as consumed.
    async fn commit(&self, delivery: &Delivery) -> CacheResult<()>;

    /// Give `delivery` back uncommitted so the channel redelivers it.
    async fn nack(&self, delivery: &Delivery) -> CacheResult<()>;
}

/// A record the consume loop could not apply and will never retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub partition: u32,
    pub offset: u64,
    pub key: Option<TenantId>,
    pub payload: Vec<u8>,
    pub reason: String,
    pub failed_at: Timestamp,
}

impl DeadLetterRecord {
    pub fn new(delivery: &Delivery, reason: impl Into<String>) -> Self {
        Self {
            partition: delivery.partition,
            offset: delivery.offset,
            key: delivery.key,
            payload: delivery.payload.clone(),
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Destination for non-retryable records.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, record: DeadLetterRecord) -> CacheResult<()>;
}

/// Keeps dead letters in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    records: tokio::sync::RwLock<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> CacheResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Writes dead letters to the log at `error` level and drops them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> CacheResult<()> {
        tracing::error!(
            partition = record.partition,
            offset = record.offset,
            key = ?record.key,
            reason = %record.reason,
            failed_at = %record.failed_at,
            payload = %String::from_utf8_lossy(&record.payload),
            "Tenant event dead-lettered"
        );
        Ok(())
    }
}

// ============================================================================
// IN-PROCESS CHANNEL
// ============================================================================

#[derive(Debug, Default)]
struct Partition {
    log: Vec<(Option<TenantId>, Vec<u8>)>,
    /// Offset of the next record to hand out.
    next: u64,
    /// A delivered, not yet committed or nacked offset.
    in_flight: Option<u64>,
}

#[derive(Debug)]
struct ChannelState {
    partitions: Vec<Partition>,
    /// Round-robin cursor over partitions.
    cursor: usize,
    commits: u64,
    nacks: u64,
}

/// In-process partitioned log.
///
/// Records are routed to a partition by their tenant id, so every record of
/// one tenant is delivered in publish order. A partition hands out at most
/// one record at a time; a nack rewinds the partition to that record.
#[derive(Debug)]
pub struct InMemoryEventChannel {
    state: tokio::sync::Mutex<ChannelState>,
}

impl InMemoryEventChannel {
    /// Create a channel with `partitions` partitions (at least one).
    pub fn new(partitions: u32) -> Self {
        let count = partitions.max(1) as usize;
        Self {
            state: tokio::sync::Mutex::new(ChannelState {
                partitions: (0..count).map(|_| Partition::default()).collect(),
                cursor: 0,
                commits: 0,
                nacks: 0,
            }),
        }
    }

    /// Partition that records keyed by `tenant_id` are routed to.
    pub fn partition_for(tenant_id: TenantId, partitions: u32) -> u32 {
        (tenant_id.as_uuid().as_u128() % u128::from(partitions.max(1))) as u32
    }

    /// Append a record keyed by `tenant_id`. Returns `(partition, offset)`.
    pub async fn publish(&self, tenant_id: TenantId, payload: Vec<u8>) -> (u32, u64) {
        let mut state = self.state.lock().await;
        let count = state.partitions.len() as u32;
        let partition = Self::partition_for(tenant_id, count);
        let log = &mut state.partitions[partition as usize].log;
        log.push((Some(tenant_id), payload));
        (partition, (log.len() - 1) as u64)
    }

    /// Append a record to an explicit partition with an arbitrary key.
    ///
    /// Lets tests reproduce producers that break the keying contract.
    pub async fn publish_raw(
        &self,
        partition: u32,
        key: Option<TenantId>,
        payload: Vec<u8>,
    ) -> Result<u64, ChannelError> {
        let mut state = self.state.lock().await;
        let slot = state
            .partitions
            .get_mut(partition as usize)
            .ok_or_else(|| ChannelError::Poll {
                reason: format!("no partition {partition}"),
            })?;
        slot.log.push((key, payload));
        Ok((slot.log.len() - 1) as u64)
    }

    /// Rewind a partition so records from `offset` are delivered again, as
    /// after a consumer restart from an older committed offset.
    pub async fn rewind(&self, partition: u32, offset: u64) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        let slot = state
            .partitions
            .get_mut(partition as usize)
            .ok_or_else(|| ChannelError::Poll {
                reason: format!("no partition {partition}"),
            })?;
        slot.next = offset.min(slot.log.len() as u64);
        slot.in_flight = None;
        Ok(())
    }

    /// Records published but not yet committed, across all partitions.
    pub async fn pending(&self) -> u64 {
        let state = self.state.lock().await;
        state
            .partitions
            .iter()
            .map(|p| p.log.len() as u64 - p.next)
            .sum::<u64>()
            + state
                .partitions
                .iter()
                .filter(|p| p.in_flight.is_some())
                .count() as u64
    }

    pub async fn partition_count(&self) -> u32 {
        self.state.lock().await.partitions.len() as u32
    }

    pub async fn commit_count(&self) -> u64 {
        self.state.lock().await.commits
    }

    pub async fn nack_count(&self) -> u64 {
        self.state.lock().await.nacks
    }
}

#[async_trait]
impl EventSource for InMemoryEventChannel {
    async fn poll(&self) -> CacheResult<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let count = state.partitions.len();
        let start = state.cursor;
        for step in 0..count {
            let index = (start + step) % count;
            let slot = &mut state.partitions[index];
            if slot.in_flight.is_some() || slot.next >= slot.log.len() as u64 {
                continue;
            }
            let offset = slot.next;
            let (key, payload) = slot.log[offset as usize].clone();
            slot.in_flight = Some(offset);
            slot.next += 1;
            state.cursor = (index + 1) % count;
            return Ok(Some(Delivery {
                partition: index as u32,
                offset,
                key,
                payload,
            }));
        }
        Ok(None)
    }

    async fn commit(&self, delivery: &Delivery) -> CacheResult<()> {
        let mut state = self.state.lock().await;
        let slot = in_flight_slot(&mut state, delivery)?;
        slot.in_flight = None;
        state.commits += 1;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> CacheResult<()> {
        let mut state = self.state.lock().await;
        let slot = in_flight_slot(&mut state, delivery)?;
        slot.in_flight = None;
        slot.next = delivery.offset;
        state.nacks += 1;
        Ok(())
    }
}

fn in_flight_slot<'a>(
    state: &'a mut ChannelState,
    delivery: &Delivery,
) -> Result<&'a mut Partition, ChannelError> {
    let slot = state
        .partitions
        .get_mut(delivery.partition as usize)
        .ok_or_else(|| ChannelError::Commit {
            partition: delivery.partition,
            offset: delivery.offset,
            reason: "unknown partition".to_string(),
        })?;
    if slot.in_flight != Some(delivery.offset) {
        return Err(ChannelError::Commit {
            partition: delivery.partition,
            offset: delivery.offset,
            reason: "offset is not in flight".to_string(),
        });
    }
    Ok(slot)
}
