//! Terminal outcome notification.

use async_trait::async_trait;
use common::InstanceId;
use definition::DefinitionRef;

use crate::status::InstanceStatus;

/// Terminal outcome of one workflow instance.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    /// The instance that finished.
    pub instance_id: InstanceId,
    /// The definition it ran.
    pub workflow: DefinitionRef,
    /// Terminal status: Succeeded, Compensated or Failed.
    pub status: InstanceStatus,
    /// Failure detail for Compensated and Failed outcomes.
    pub reason: Option<String>,
}

/// Receives a notification when an instance reaches a terminal status.
///
/// Publishing is best-effort: the engine records the terminal event
/// before notifying, and a publisher error never rolls the instance back.
#[async_trait]
pub trait OutcomePublisher: Send + Sync {
    async fn publish(&self, outcome: WorkflowOutcome);
}

/// Publisher that only logs the outcome.
#[derive(Debug, Default)]
pub struct NullPublisher;

#[async_trait]
impl OutcomePublisher for NullPublisher {
    async fn publish(&self, outcome: WorkflowOutcome) {
        tracing::info!(
            instance_id = %outcome.instance_id,
            workflow = %outcome.workflow,
            status = %outcome.status,
            "Workflow instance reached terminal status"
        );
    }
}

/// Publisher that records outcomes in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    outcomes: std::sync::Mutex<Vec<WorkflowOutcome>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all published outcomes in publish order.
    pub fn outcomes(&self) -> Vec<WorkflowOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomePublisher for RecordingPublisher {
    async fn publish(&self, outcome: WorkflowOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}
