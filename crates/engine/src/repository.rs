//! Reading workflow instances back out of the instance store.

use common::InstanceId;
use definition::DefinitionRef;
use instance_store::{EventEnvelope, InstanceStore};
use serde::Serialize;

use crate::error::EngineError;
use crate::events::InstanceEvent;
use crate::instance::WorkflowInstance;
use crate::status::InstanceStatus;

/// Rebuilds an instance by replaying its stored event log.
pub fn replay(events: &[EventEnvelope]) -> Result<WorkflowInstance, serde_json::Error> {
    let mut instance = WorkflowInstance::default();
    for envelope in events {
        let event: InstanceEvent = serde_json::from_value(envelope.payload.clone())?;
        instance.apply(event);
    }
    Ok(instance)
}

/// One instance in a status listing.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    /// The instance ID.
    pub instance_id: InstanceId,
    /// The definition the instance runs.
    pub workflow: Option<DefinitionRef>,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Most recent failure detail, if any.
    pub failure_reason: Option<String>,
}

/// Read-side access to workflow instances.
///
/// The store holds opaque envelopes; this repository decodes payloads
/// into transition events and folds them into instance state.
pub struct InstanceRepository<S> {
    store: S,
}

impl<S: InstanceStore> InstanceRepository<S> {
    pub fn new(store: S) -> Self {
        InstanceRepository { store }
    }

    /// Rebuilds the current state of an instance.
    pub async fn load_state(&self, instance_id: InstanceId) -> Result<WorkflowInstance, EngineError> {
        let events = self.store.events_for_instance(instance_id).await?;
        if events.is_empty() {
            return Err(EngineError::InstanceNotFound(instance_id));
        }
        Ok(replay(&events)?)
    }

    /// Returns the raw event log of an instance, oldest first.
    pub async fn events(&self, instance_id: InstanceId) -> Result<Vec<EventEnvelope>, EngineError> {
        let events = self.store.events_for_instance(instance_id).await?;
        if events.is_empty() {
            return Err(EngineError::InstanceNotFound(instance_id));
        }
        Ok(events)
    }

    /// Lists known instances, optionally filtered by status.
    pub async fn list_by_status(
        &self,
        filter: Option<InstanceStatus>,
    ) -> Result<Vec<InstanceSummary>, EngineError> {
        let mut summaries = Vec::new();
        for instance_id in self.store.list_instances().await? {
            let state = self.load_state(instance_id).await?;
            if let Some(status) = filter
                && state.status() != status
            {
                continue;
            }
            summaries.push(InstanceSummary {
                instance_id,
                workflow: state.workflow().cloned(),
                status: state.status(),
                failure_reason: state.failure_reason().map(str::to_owned),
            });
        }
        Ok(summaries)
    }
}
