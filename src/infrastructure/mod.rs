// Copyright 2025 Cowboy AI, LLC.

//! Infrastructure layer for cim-dispatch
//!
//! This module contains the persistence concerns behind the buses:
//! - Event store trait and stored event shape
//! - In-memory event store for tests and ephemeral setups
//! - PostgreSQL event store with archival support

pub mod event_store;
pub mod memory_event_store;
pub mod postgres_event_store;

pub use event_store::{
    EventStore, EventStoreError, EventStoreStats, EventTypeCount, StoredEvent,
};
pub use memory_event_store::InMemoryEventStore;
pub use postgres_event_store::{PostgresEventStore, PostgresEventStoreConfig};
