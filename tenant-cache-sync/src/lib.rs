//! Tenant Cache Sync - Synchronizer, Consume Loop and Gate
//!
//! Keeps a service's local tenant store in step with registry lifecycle
//! events and answers authorization questions from it:
//!
//! - [`CacheSynchronizer`] applies one event under the version-monotonicity
//!   rule with optimistic-lock retries.
//! - [`SyncWorker`] drives the at-least-once consume loop over an
//!   [`EventSource`], routing non-retryable records to a [`DeadLetterSink`].
//! - [`AuthorizationGate`] and [`PolicyGate`] are pure reads against the
//!   store; unknown tenants are denied.
//! - [`StalenessMonitor`] reports entries that stopped receiving events.
//!
//! Every component takes an explicitly constructed store; there is no
//! process-wide cache.

mod channel;
mod gate;
mod monitor;
mod synchronizer;
pub mod telemetry;
mod worker;

pub use channel::{
    DeadLetterRecord, DeadLetterSink, Delivery, EventSource, InMemoryDeadLetterSink,
    InMemoryEventChannel, TracingDeadLetterSink,
};
pub use gate::{
    AuthorizationGate, BasePolicy, DenyReason, ExcludeTrial, GateDecision, GatePolicy, PolicyGate,
    RequireStatus,
};
pub use monitor::{staleness_monitor_task, StalenessMetrics, StalenessMonitor, StalenessSnapshot};
pub use synchronizer::{ApplyOutcome, CacheSynchronizer};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
pub use worker::{DeliveryOutcome, SyncMetrics, SyncMetricsSnapshot, SyncWorker};
