use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, InstanceId, InstanceStoreError, Result, Sequence,
    store::{AppendOptions, InstanceStore, validate_events_for_append},
};

/// In-memory instance store.
///
/// Backs tests and local runs with the same interface and conflict
/// semantics as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryInstanceStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryInstanceStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of entries stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all entries.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Sequence> {
        validate_events_for_append(&events)?;

        let first_event = &events[0];
        let instance_id = first_event.instance_id;

        let mut store = self.events.write().await;

        let current_sequence = store
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .map(|e| e.sequence)
            .max()
            .unwrap_or(Sequence::initial());

        if let Some(expected) = options.expected_sequence
            && current_sequence != expected
        {
            return Err(InstanceStoreError::SequenceConflict {
                instance_id,
                expected,
                actual: current_sequence,
            });
        }

        // Unique (instance_id, sequence) constraint simulation
        if first_event.sequence <= current_sequence && current_sequence != Sequence::initial() {
            return Err(InstanceStoreError::SequenceConflict {
                instance_id,
                expected: options.expected_sequence.unwrap_or(current_sequence),
                actual: current_sequence,
            });
        }

        let last_sequence = events
            .last()
            .map(|e| e.sequence)
            .unwrap_or(Sequence::initial());
        store.extend(events);

        Ok(last_sequence)
    }

    async fn events_for_instance(&self, instance_id: InstanceId) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn events_from_sequence(
        &self,
        instance_id: InstanceId,
        from_sequence: Sequence,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.instance_id == instance_id && e.sequence >= from_sequence)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn current_sequence(&self, instance_id: InstanceId) -> Result<Option<Sequence>> {
        let store = self.events.read().await;
        let sequence = store
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .map(|e| e.sequence)
            .max();
        Ok(sequence)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceId>> {
        let store = self.events.read().await;
        let mut ids: Vec<InstanceId> = Vec::new();
        for event in store.iter() {
            if !ids.contains(&event.instance_id) {
                ids.push(event.instance_id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(
        instance_id: InstanceId,
        sequence: Sequence,
        event_type: &str,
    ) -> EventEnvelope {
        EventEnvelope::builder()
            .instance_id(instance_id)
            .event_type(event_type)
            .sequence(sequence)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryInstanceStore::new();
        let instance_id = InstanceId::new();
        let event = create_test_event(instance_id, Sequence::first(), "InstanceStarted");

        let result = store.append(vec![event], AppendOptions::expect_new()).await;
        assert_eq!(result.unwrap(), Sequence::first());

        let events = store.events_for_instance(instance_id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn append_multiple_events() {
        let store = InMemoryInstanceStore::new();
        let instance_id = InstanceId::new();

        let events = vec![
            create_test_event(instance_id, Sequence::new(1), "InstanceStarted"),
            create_test_event(instance_id, Sequence::new(2), "StepStarted"),
            create_test_event(instance_id, Sequence::new(3), "StepSucceeded"),
        ];

        let result = store.append(events, AppendOptions::expect_new()).await;
        assert_eq!(result.unwrap(), Sequence::new(3));

        let stored = store.events_for_instance(instance_id).await.unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn sequence_conflict_on_wrong_expectation() {
        let store = InMemoryInstanceStore::new();
        let instance_id = InstanceId::new();

        let event1 = create_test_event(instance_id, Sequence::first(), "InstanceStarted");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event(instance_id, Sequence::new(2), "StepStarted");
        let result = store
            .append(
                vec![event2],
                AppendOptions::expect_sequence(Sequence::initial()),
            )
            .await;

        assert!(matches!(
            result,
            Err(InstanceStoreError::SequenceConflict { .. })
        ));
    }

    #[tokio::test]
    async fn append_with_correct_expectation() {
        let store = InMemoryInstanceStore::new();
        let instance_id = InstanceId::new();

        let event1 = create_test_event(instance_id, Sequence::first(), "InstanceStarted");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event(instance_id, Sequence::new(2), "StepStarted");
        let result = store
            .append(
                vec![event2],
                AppendOptions::expect_sequence(Sequence::first()),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn duplicate_sequence_rejected() {
        let store = InMemoryInstanceStore::new();
        let instance_id = InstanceId::new();

        let event1 = create_test_event(instance_id, Sequence::first(), "InstanceStarted");
        store
            .append(vec![event1], AppendOptions::new())
            .await
            .unwrap();

        let duplicate = create_test_event(instance_id, Sequence::first(), "StepStarted");
        let result = store.append(vec![duplicate], AppendOptions::new()).await;
        assert!(matches!(
            result,
            Err(InstanceStoreError::SequenceConflict { .. })
        ));
    }

    #[tokio::test]
    async fn events_from_sequence() {
        let store = InMemoryInstanceStore::new();
        let instance_id = InstanceId::new();

        let events = vec![
            create_test_event(instance_id, Sequence::new(1), "InstanceStarted"),
            create_test_event(instance_id, Sequence::new(2), "StepStarted"),
            create_test_event(instance_id, Sequence::new(3), "StepSucceeded"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        let from_2 = store
            .events_from_sequence(instance_id, Sequence::new(2))
            .await
            .unwrap();
        assert_eq!(from_2.len(), 2);
        assert_eq!(from_2[0].sequence, Sequence::new(2));
        assert_eq!(from_2[1].sequence, Sequence::new(3));
    }

    #[tokio::test]
    async fn current_sequence_tracks_tail() {
        let store = InMemoryInstanceStore::new();
        let instance_id = InstanceId::new();

        assert!(
            store
                .current_sequence(instance_id)
                .await
                .unwrap()
                .is_none()
        );

        let events = vec![
            create_test_event(instance_id, Sequence::new(1), "InstanceStarted"),
            create_test_event(instance_id, Sequence::new(2), "StepStarted"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        assert_eq!(
            store.current_sequence(instance_id).await.unwrap(),
            Some(Sequence::new(2))
        );
    }

    #[tokio::test]
    async fn list_instances_returns_distinct_ids() {
        let store = InMemoryInstanceStore::new();
        let id1 = InstanceId::new();
        let id2 = InstanceId::new();

        store
            .append(
                vec![create_test_event(id1, Sequence::first(), "InstanceStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event(id2, Sequence::first(), "InstanceStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event(id1, Sequence::new(2), "StepStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let ids = store.list_instances().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&id1));
        assert!(ids.contains(&id2));
    }

    #[tokio::test]
    async fn independent_instances_do_not_conflict() {
        let store = InMemoryInstanceStore::new();
        let id1 = InstanceId::new();
        let id2 = InstanceId::new();

        store
            .append(
                vec![create_test_event(id1, Sequence::first(), "InstanceStarted")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        let result = store
            .append(
                vec![create_test_event(id2, Sequence::first(), "InstanceStarted")],
                AppendOptions::expect_new(),
            )
            .await;

        assert!(result.is_ok());
    }
}
