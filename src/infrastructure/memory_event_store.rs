//! In-memory event store
//!
//! Backing store for tests and ephemeral deployments. Semantics mirror the
//! PostgreSQL store including per-aggregate version uniqueness, atomic
//! batches, and copy-then-delete archival.

use super::event_store::{
    EventStore, EventStoreError, EventStoreStats, EventTypeCount, StoredEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Event store that keeps everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
    archive: RwLock<Vec<StoredEvent>>,
    archive_disabled: bool,
}

impl InMemoryEventStore {
    /// Create an empty store with archival enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose archive operation is a no-op
    pub fn with_archive_disabled() -> Self {
        Self {
            archive_disabled: true,
            ..Self::default()
        }
    }

    /// Events moved out of the live table by archival, oldest first
    pub async fn archived_events(&self) -> Vec<StoredEvent> {
        self.archive.read().await.clone()
    }

    fn conflicts(existing: &[StoredEvent], candidate: &StoredEvent) -> bool {
        existing
            .iter()
            .any(|e| e.aggregate_id == candidate.aggregate_id && e.version == candidate.version)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(&self, event: StoredEvent) -> Result<(), EventStoreError> {
        let mut events = self.events.write().await;
        if Self::conflicts(&events, &event) {
            return Err(EventStoreError::VersionConflict {
                aggregate_id: event.aggregate_id,
                version: event.version,
            });
        }
        events.push(event);
        Ok(())
    }

    async fn store_events_batch(&self, batch: Vec<StoredEvent>) -> Result<(), EventStoreError> {
        let mut events = self.events.write().await;

        // Validate the whole batch, including against its own earlier
        // entries, before anything is appended.
        let mut staged: Vec<&StoredEvent> = Vec::with_capacity(batch.len());
        for event in &batch {
            let conflict = Self::conflicts(&events, event)
                || staged
                    .iter()
                    .any(|s| s.aggregate_id == event.aggregate_id && s.version == event.version);
            if conflict {
                return Err(EventStoreError::VersionConflict {
                    aggregate_id: event.aggregate_id.clone(),
                    version: event.version,
                });
            }
            staged.push(event);
        }

        events.extend(batch);
        Ok(())
    }

    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let events = self.events.read().await;
        let mut matching: Vec<StoredEvent> = events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.version);
        Ok(matching)
    }

    async fn get_events_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let events = self.events.read().await;
        let mut matching: Vec<StoredEvent> = events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn get_all_events(
        &self,
        from_timestamp: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let events = self.events.read().await;
        let mut matching: Vec<StoredEvent> = match from_timestamp {
            Some(cutoff) => events
                .iter()
                .filter(|e| e.timestamp >= cutoff)
                .cloned()
                .collect(),
            None => events.iter().cloned().collect(),
        };
        match from_timestamp {
            Some(_) => matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            None => matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        }
        matching.truncate(limit);
        Ok(matching)
    }

    async fn get_statistics(&self) -> Result<EventStoreStats, EventStoreError> {
        let events = self.events.read().await;

        let mut aggregates = HashSet::new();
        let mut users = HashSet::new();
        let mut type_counts: HashMap<String, u64> = HashMap::new();
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        for event in events.iter() {
            aggregates.insert(event.aggregate_id.as_str());
            if let Some(user) = &event.user_id {
                users.insert(user.as_str());
            }
            *type_counts.entry(event.event_type.clone()).or_insert(0) += 1;
            oldest = Some(oldest.map_or(event.timestamp, |t| t.min(event.timestamp)));
            newest = Some(newest.map_or(event.timestamp, |t| t.max(event.timestamp)));
        }

        let distinct_event_types = type_counts.len() as u64;
        let mut top_event_types: Vec<EventTypeCount> = type_counts
            .into_iter()
            .map(|(event_type, count)| EventTypeCount { event_type, count })
            .collect();
        top_event_types.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.event_type.cmp(&b.event_type))
        });
        top_event_types.truncate(10);

        Ok(EventStoreStats {
            total_events: events.len() as u64,
            distinct_aggregates: aggregates.len() as u64,
            distinct_event_types,
            distinct_users: users.len() as u64,
            oldest_event: oldest,
            newest_event: newest,
            top_event_types,
        })
    }

    async fn archive_old_events(&self, days_old: u32) -> Result<u64, EventStoreError> {
        if self.archive_disabled {
            debug!("archival disabled, skipping");
            return Ok(0);
        }

        let cutoff = Utc::now() - chrono::Duration::days(days_old as i64);
        let mut events = self.events.write().await;
        let mut archive = self.archive.write().await;

        let mut kept = Vec::with_capacity(events.len());
        let mut moved = 0u64;
        for event in events.drain(..) {
            if event.timestamp < cutoff {
                archive.push(event);
                moved += 1;
            } else {
                kept.push(event);
            }
        }
        *events = kept;

        debug!(moved, days_old, "archived old events");
        Ok(moved)
    }

    async fn get_aggregate_version(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<i64>, EventStoreError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, aggregate_id: &str, version: i64) -> StoredEvent {
        StoredEvent::new(event_type, aggregate_id, version, json!({"v": version}))
    }

    #[tokio::test]
    async fn test_store_and_replay_in_version_order() {
        let store = InMemoryEventStore::new();
        store.store_event(event("Created", "order-1", 1)).await.unwrap();
        store.store_event(event("Updated", "order-1", 3)).await.unwrap();
        store.store_event(event("Updated", "order-1", 2)).await.unwrap();
        store.store_event(event("Created", "order-2", 1)).await.unwrap();

        let events = store.get_events("order-1", 0).await.unwrap();
        let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_replay_from_version_is_inclusive() {
        let store = InMemoryEventStore::new();
        for v in 1..=5 {
            store.store_event(event("Updated", "order-1", v)).await.unwrap();
        }

        let events = store.get_events("order-1", 3).await.unwrap();
        let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_duplicate_version_is_rejected() {
        let store = InMemoryEventStore::new();
        store.store_event(event("Created", "order-1", 1)).await.unwrap();

        let error = store
            .store_event(event("Created", "order-1", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            EventStoreError::VersionConflict { version: 1, .. }
        ));
    }

    /// A conflicting batch must leave the store untouched
    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        store.store_event(event("Created", "order-1", 1)).await.unwrap();

        let batch = vec![
            event("Updated", "order-1", 2),
            event("Updated", "order-1", 1),
            event("Updated", "order-1", 3),
        ];
        store.store_events_batch(batch).await.unwrap_err();

        let events = store.get_events("order-1", 0).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_rejects_internal_duplicates() {
        let store = InMemoryEventStore::new();
        let batch = vec![
            event("Created", "order-1", 1),
            event("Created", "order-1", 1),
        ];
        store.store_events_batch(batch).await.unwrap_err();
        assert_eq!(store.get_events("order-1", 0).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_events_by_type_most_recent_first() {
        let store = InMemoryEventStore::new();
        let mut early = event("Created", "order-1", 1);
        early.timestamp = Utc::now() - chrono::Duration::minutes(10);
        let late = event("Created", "order-2", 1);
        store.store_event(early).await.unwrap();
        store.store_event(late).await.unwrap();
        store.store_event(event("Updated", "order-1", 2)).await.unwrap();

        let events = store.get_events_by_type("Created", 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].aggregate_id, "order-2");
        assert_eq!(events[1].aggregate_id, "order-1");

        let limited = store.get_events_by_type("Created", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].aggregate_id, "order-2");
    }

    #[tokio::test]
    async fn test_all_events_ordering_depends_on_cutoff() {
        let store = InMemoryEventStore::new();
        let now = Utc::now();
        for (i, minutes) in [30i64, 20, 10].iter().enumerate() {
            let mut e = event("Created", &format!("order-{i}"), 1);
            e.timestamp = now - chrono::Duration::minutes(*minutes);
            store.store_event(e).await.unwrap();
        }

        // No cutoff: newest first
        let recent = store.get_all_events(None, 10).await.unwrap();
        assert_eq!(recent[0].aggregate_id, "order-2");
        assert_eq!(recent[2].aggregate_id, "order-0");

        // With cutoff: ascending, excluding events before it
        let cutoff = now - chrono::Duration::minutes(25);
        let since = store.get_all_events(Some(cutoff), 10).await.unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].aggregate_id, "order-1");
        assert_eq!(since[1].aggregate_id, "order-2");
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = InMemoryEventStore::new();
        store
            .store_event(event("Created", "order-1", 1).with_user_id("alice"))
            .await
            .unwrap();
        store
            .store_event(event("Updated", "order-1", 2).with_user_id("alice"))
            .await
            .unwrap();
        store
            .store_event(event("Updated", "order-2", 1).with_user_id("bob"))
            .await
            .unwrap();

        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.distinct_aggregates, 2);
        assert_eq!(stats.distinct_event_types, 2);
        assert_eq!(stats.distinct_users, 2);
        assert!(stats.oldest_event.is_some());
        assert_eq!(stats.top_event_types[0].event_type, "Updated");
        assert_eq!(stats.top_event_types[0].count, 2);
    }

    #[tokio::test]
    async fn test_empty_statistics() {
        let store = InMemoryEventStore::new();
        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_events, 0);
        assert!(stats.oldest_event.is_none());
        assert!(stats.top_event_types.is_empty());
    }

    #[tokio::test]
    async fn test_archive_moves_old_events() {
        let store = InMemoryEventStore::new();
        let mut old = event("Created", "order-1", 1);
        old.timestamp = Utc::now() - chrono::Duration::days(120);
        store.store_event(old).await.unwrap();
        store.store_event(event("Created", "order-2", 1)).await.unwrap();

        let moved = store.archive_old_events(90).await.unwrap();
        assert_eq!(moved, 1);

        let remaining = store.get_all_events(None, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].aggregate_id, "order-2");

        let archived = store.archived_events().await;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].aggregate_id, "order-1");
    }

    #[tokio::test]
    async fn test_archive_noop_when_disabled() {
        let store = InMemoryEventStore::with_archive_disabled();
        let mut old = event("Created", "order-1", 1);
        old.timestamp = Utc::now() - chrono::Duration::days(120);
        store.store_event(old).await.unwrap();

        let moved = store.archive_old_events(90).await.unwrap();
        assert_eq!(moved, 0);
        assert_eq!(store.get_all_events(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_version_tracking() {
        let store = InMemoryEventStore::new();
        assert_eq!(store.get_aggregate_version("order-1").await.unwrap(), None);

        store.store_event(event("Created", "order-1", 1)).await.unwrap();
        store.store_event(event("Updated", "order-1", 2)).await.unwrap();

        assert_eq!(
            store.get_aggregate_version("order-1").await.unwrap(),
            Some(2)
        );
    }
}
