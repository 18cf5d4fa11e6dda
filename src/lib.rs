//! # CIM Dispatch
//!
//! CQRS dispatch core for the Composable Information Machine: command and
//! query buses with middleware pipelines, a persistent event store, and a
//! coordinator that owns the lifecycle of the whole assembly.
//!
//! The crate provides the building blocks for command/query separation:
//! - **Commands**: Requests to change state, dispatched through an audited bus
//! - **Queries**: Requests to read state, dispatched through a cached bus
//! - **Envelopes**: Identity, timing, and attribution wrapped around every message
//! - **Middleware**: Ordered wrappers composing validation, timing, retry, and pagination
//! - **Event Store**: Append-only persistence with per-aggregate versioning and archival
//! - **Coordinator**: Explicit wiring, lifecycle gating, and aggregated health
//!
//! ## Design Principles
//!
//! 1. **Closed Message Sets**: Commands and queries are enums the caller defines,
//!    dispatched statically rather than through type erasure
//! 2. **Envelopes by Inclusion**: Message metadata wraps the payload; payload types
//!    stay plain data
//! 3. **Composed Pipelines**: Middleware wrap the next stage, folded in reverse so
//!    the first added runs outermost
//! 4. **Best-Effort Audit**: Dispatch outcomes are recorded in the event store but
//!    never change the caller's result
//! 5. **Explicit Dependencies**: The coordinator receives its buses and store; there
//!    is no global registry

#![warn(missing_docs)]

mod cache;
mod command_bus;
mod coordinator;
mod cqrs;
mod errors;
mod metrics;
mod middleware;
mod query_bus;
pub mod infrastructure;

// Re-export core types
pub use cache::{cache_key, CacheConfig, LruTtlCache, QueryCache};
pub use command_bus::{CommandBus, CommandBusStats};
pub use coordinator::{
    CoordinatorConfig, CoordinatorStats, CqrsCoordinator, HealthReport, HealthStatus,
};
pub use cqrs::{
    Command, CommandEnvelope, CommandHandler, Query, QueryCriteria, QueryEnvelope, QueryHandler,
};
pub use errors::{DispatchError, DispatchResult};
pub use metrics::{
    HistogramStats, InMemoryMetricsSink, MetricsSink, MetricsSummary, NoopMetricsSink,
};
pub use middleware::{
    CommandMiddleware, CommandStage, CompressionMiddleware, PaginationMiddleware, QueryMiddleware,
    QueryStage, RetryMiddleware, RetryPolicy, TimingMiddleware, ValidationMiddleware,
};
pub use query_bus::{QueryBus, QueryBusConfig, QueryBusStats, DEFAULT_QUERY_TIMEOUT};

// Re-export the persistence layer's core surface
pub use infrastructure::{
    EventStore, EventStoreError, EventStoreStats, EventTypeCount, InMemoryEventStore,
    PostgresEventStore, PostgresEventStoreConfig, StoredEvent,
};
