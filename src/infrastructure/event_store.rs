//! Event store trait and related types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when working with the event store
#[derive(Debug, Clone, Error)]
pub enum EventStoreError {
    /// Failed to reach the underlying storage
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failed to serialize or deserialize event data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An event with the same (aggregate_id, version) pair already exists
    #[error("Version conflict: aggregate {aggregate_id} already has version {version}")]
    VersionConflict {
        /// Aggregate the conflicting event belongs to
        aggregate_id: String,
        /// Version that was already present
        version: i64,
    },

    /// Requested event was not found
    #[error("Event not found: {0}")]
    NotFound(String),

    /// General storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),
}

/// An immutable event row in the store
///
/// Events are only ever inserted; the sole exception is the archival move,
/// which copies and deletes whole rows in one transaction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoredEvent {
    /// Unique event ID
    pub event_id: Uuid,

    /// Event type name (e.g. "COMMAND_EXECUTED", "OrderShipped")
    pub event_type: String,

    /// Aggregate this event belongs to
    pub aggregate_id: String,

    /// Position of this event within its aggregate, starting at 1
    pub version: i64,

    /// Event payload
    pub data: serde_json::Value,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Correlation ID propagated from the originating dispatch
    pub correlation_id: Option<Uuid>,

    /// User or system that triggered the event
    pub user_id: Option<String>,

    /// Additional custom metadata
    pub metadata: serde_json::Value,
}

impl StoredEvent {
    /// Create a new event with a fresh ID and the current timestamp
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        version: i64,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            version,
            data,
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the user that triggered the event
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set custom metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Event count for one event type, used in statistics rankings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EventTypeCount {
    /// Event type name
    pub event_type: String,
    /// Number of stored events of this type
    pub count: u64,
}

/// Event store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EventStoreStats {
    /// Total number of events
    pub total_events: u64,

    /// Number of distinct aggregates
    pub distinct_aggregates: u64,

    /// Number of distinct event types
    pub distinct_event_types: u64,

    /// Number of distinct users that triggered events
    pub distinct_users: u64,

    /// Oldest event timestamp
    pub oldest_event: Option<DateTime<Utc>>,

    /// Newest event timestamp
    pub newest_event: Option<DateTime<Utc>>,

    /// Most frequent event types, highest count first
    pub top_event_types: Vec<EventTypeCount>,
}

/// Append-only event store with per-aggregate replay and archiving
///
/// Within one aggregate, events are strictly ordered by version and the
/// (aggregate_id, version) pair is unique; inserting a duplicate fails with
/// [`EventStoreError::VersionConflict`]. Across aggregates there is no
/// ordering guarantee.
#[async_trait]
pub trait EventStore: Send + Sync + fmt::Debug {
    /// Prepare backing storage, creating schema objects if needed
    ///
    /// Safe to call repeatedly; the default does nothing.
    async fn initialize(&self) -> Result<(), EventStoreError> {
        Ok(())
    }

    /// Append one immutable event
    async fn store_event(&self, event: StoredEvent) -> Result<(), EventStoreError>;

    /// Append multiple events in one atomic transaction
    ///
    /// Either every event is stored or none is.
    async fn store_events_batch(&self, events: Vec<StoredEvent>) -> Result<(), EventStoreError>;

    /// Get events for an aggregate, ascending by version
    ///
    /// Returns events with `version >= from_version`; pass 1 for a full
    /// replay.
    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Get events of one type across all aggregates, most recent first
    async fn get_events_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Get events across all aggregates
    ///
    /// With `from_timestamp` the result is ascending from that instant (a
    /// resumable cursor); without it the result is descending, most recent
    /// first.
    async fn get_all_events(
        &self,
        from_timestamp: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Get aggregate counts, timestamp bounds, and top event types
    async fn get_statistics(&self) -> Result<EventStoreStats, EventStoreError>;

    /// Move events older than `days_old` days into the archive
    ///
    /// Copy-then-delete in one transaction; returns the number of events
    /// moved. A store with archiving disabled logs and returns 0.
    async fn archive_old_events(&self, days_old: u32) -> Result<u64, EventStoreError>;

    /// Get the highest stored version for an aggregate, if any
    async fn get_aggregate_version(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<i64>, EventStoreError>;
}
