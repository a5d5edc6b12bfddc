use async_trait::async_trait;

use crate::{EventEnvelope, InstanceId, InstanceStoreError, Result, Sequence};

/// Options for appending entries to an instance log.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected current tail sequence of the instance log.
    /// If None, no check is performed (use with caution).
    pub expected_sequence: Option<Sequence>,
}

impl AppendOptions {
    /// Creates options with no sequence check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the log to be at a specific sequence.
    pub fn expect_sequence(sequence: Sequence) -> Self {
        Self {
            expected_sequence: Some(sequence),
        }
    }

    /// Creates options expecting the instance to have no entries yet.
    pub fn expect_new() -> Self {
        Self {
            expected_sequence: Some(Sequence::initial()),
        }
    }
}

/// Core trait for instance store implementations.
///
/// The store holds one strictly ordered, append-only log per instance.
/// The engine appends the intended transition before acting on it, so a
/// crash can only lose in-flight work, never recorded history. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Appends entries to an instance's log.
    ///
    /// Entries are appended atomically. If `options.expected_sequence`
    /// is set, the operation fails with `SequenceConflict` when the
    /// log's current tail doesn't match.
    ///
    /// Returns the new tail sequence after appending.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Sequence>;

    /// Retrieves all entries for an instance, oldest first.
    async fn events_for_instance(&self, instance_id: InstanceId) -> Result<Vec<EventEnvelope>>;

    /// Retrieves entries for an instance starting from a sequence.
    async fn events_from_sequence(
        &self,
        instance_id: InstanceId,
        from_sequence: Sequence,
    ) -> Result<Vec<EventEnvelope>>;

    /// Returns the current tail sequence of an instance's log.
    ///
    /// Returns None if the instance has no entries.
    async fn current_sequence(&self, instance_id: InstanceId) -> Result<Option<Sequence>>;

    /// Returns the IDs of all instances with at least one entry.
    async fn list_instances(&self) -> Result<Vec<InstanceId>>;
}

#[async_trait]
impl<T: InstanceStore + ?Sized> InstanceStore for std::sync::Arc<T> {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Sequence> {
        (**self).append(events, options).await
    }

    async fn events_for_instance(&self, instance_id: InstanceId) -> Result<Vec<EventEnvelope>> {
        (**self).events_for_instance(instance_id).await
    }

    async fn events_from_sequence(
        &self,
        instance_id: InstanceId,
        from_sequence: Sequence,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).events_from_sequence(instance_id, from_sequence).await
    }

    async fn current_sequence(&self, instance_id: InstanceId) -> Result<Option<Sequence>> {
        (**self).current_sequence(instance_id).await
    }

    async fn list_instances(&self) -> Result<Vec<InstanceId>> {
        (**self).list_instances().await
    }
}

/// Validates an append batch before it is written.
pub(crate) fn validate_events_for_append(
    events: &[EventEnvelope],
) -> std::result::Result<(), InstanceStoreError> {
    if events.is_empty() {
        return Err(InstanceStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    }

    let first = &events[0];
    for event in events.iter().skip(1) {
        if event.instance_id != first.instance_id {
            return Err(InstanceStoreError::InvalidAppend(
                "all entries in a batch must belong to the same instance".to_string(),
            ));
        }
    }

    let mut expected = first.sequence;
    for event in events.iter().skip(1) {
        expected = expected.next();
        if event.sequence != expected {
            return Err(InstanceStoreError::InvalidAppend(format!(
                "entry sequences must be contiguous: expected {expected}, got {}",
                event.sequence
            )));
        }
    }

    Ok(())
}
