//! Instance transition events.
//!
//! Every change to a workflow instance is expressed as one of these
//! events, appended to the instance store before it is acted upon and
//! replayed through [`crate::WorkflowInstance::apply`] to rebuild state.

use chrono::{DateTime, Utc};
use common::InstanceId;
use definition::DefinitionRef;
use serde::{Deserialize, Serialize};

use crate::instance::Context;

/// Events that can occur during workflow instance execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InstanceEvent {
    /// A new instance was created from a definition.
    InstanceStarted(InstanceStartedData),

    /// A step invocation attempt began.
    StepStarted(StepAttemptData),

    /// A step attempt completed successfully.
    StepSucceeded(StepSucceededData),

    /// A step attempt failed or timed out.
    StepFailed(StepFailedData),

    /// A failed step will be re-attempted after a delay.
    RetryScheduled(RetryScheduledData),

    /// The instance began unwinding; the named steps await compensation.
    CompensationStarted(CompensationStartedData),

    /// A compensation invocation is about to run for a step.
    StepCompensationStarted(StepData),

    /// A step's compensation completed successfully.
    StepCompensated(StepData),

    /// A step's compensation failed; the unwind halts here.
    StepCompensationFailed(StepErrorData),

    /// Every step succeeded (terminal).
    InstanceSucceeded(CompletedData),

    /// All eligible compensations completed (terminal).
    InstanceCompensated(CompletedData),

    /// Execution or compensation failed (terminal).
    InstanceFailed(InstanceFailedData),
}

impl InstanceEvent {
    /// Returns the event type name used for storage and filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            InstanceEvent::InstanceStarted(_) => "InstanceStarted",
            InstanceEvent::StepStarted(_) => "StepStarted",
            InstanceEvent::StepSucceeded(_) => "StepSucceeded",
            InstanceEvent::StepFailed(_) => "StepFailed",
            InstanceEvent::RetryScheduled(_) => "RetryScheduled",
            InstanceEvent::CompensationStarted(_) => "CompensationStarted",
            InstanceEvent::StepCompensationStarted(_) => "StepCompensationStarted",
            InstanceEvent::StepCompensated(_) => "StepCompensated",
            InstanceEvent::StepCompensationFailed(_) => "StepCompensationFailed",
            InstanceEvent::InstanceSucceeded(_) => "InstanceSucceeded",
            InstanceEvent::InstanceCompensated(_) => "InstanceCompensated",
            InstanceEvent::InstanceFailed(_) => "InstanceFailed",
        }
    }
}

/// Data for InstanceStarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStartedData {
    /// The new instance's ID.
    pub instance_id: InstanceId,
    /// The definition the instance is bound to.
    pub workflow: DefinitionRef,
    /// The trigger payload, seeding the instance context.
    pub initial_context: Context,
    /// When the instance started.
    pub started_at: DateTime<Utc>,
}

/// Data for step attempt events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAttemptData {
    /// The step name.
    pub step: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Data for StepSucceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSucceededData {
    /// The step name.
    pub step: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Result fragment returned by the operation, merged into the
    /// instance context under keys namespaced by the step name.
    pub output: serde_json::Value,
}

/// Data for StepFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    /// The step that failed.
    pub step: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Error detail reported by the operation, or a timeout notice.
    pub error: String,
    /// True when the attempt hit its timeout rather than reporting a
    /// business failure. Treated the same for retries, recorded
    /// distinctly for diagnostics.
    pub timed_out: bool,
}

/// Data for RetryScheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryScheduledData {
    /// The step to be retried.
    pub step: String,
    /// The attempt that just failed.
    pub attempt: u32,
    /// Delay before the next attempt, in milliseconds.
    pub delay_ms: u64,
}

/// Data for CompensationStarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationStartedData {
    /// Why the instance is unwinding.
    pub reason: String,
    /// Steps whose compensations are now pending, in the order they
    /// will be invoked (reverse dependency order).
    pub pending: Vec<String>,
}

/// Data for events that only name a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    /// The step name.
    pub step: String,
}

/// Data for StepCompensationFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepErrorData {
    /// The step whose compensation failed.
    pub step: String,
    /// Error detail.
    pub error: String,
}

/// Data for terminal success events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedData {
    /// When the terminal status was reached.
    pub at: DateTime<Utc>,
}

/// Data for InstanceFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFailedData {
    /// Reason for failure.
    pub reason: String,
    /// When the instance failed.
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl InstanceEvent {
    /// Creates an InstanceStarted event.
    pub fn instance_started(
        instance_id: InstanceId,
        workflow: DefinitionRef,
        initial_context: Context,
    ) -> Self {
        InstanceEvent::InstanceStarted(InstanceStartedData {
            instance_id,
            workflow,
            initial_context,
            started_at: Utc::now(),
        })
    }

    /// Creates a StepStarted event.
    pub fn step_started(step: impl Into<String>, attempt: u32) -> Self {
        InstanceEvent::StepStarted(StepAttemptData {
            step: step.into(),
            attempt,
        })
    }

    /// Creates a StepSucceeded event.
    pub fn step_succeeded(step: impl Into<String>, attempt: u32, output: serde_json::Value) -> Self {
        InstanceEvent::StepSucceeded(StepSucceededData {
            step: step.into(),
            attempt,
            output,
        })
    }

    /// Creates a StepFailed event.
    pub fn step_failed(
        step: impl Into<String>,
        attempt: u32,
        error: impl Into<String>,
        timed_out: bool,
    ) -> Self {
        InstanceEvent::StepFailed(StepFailedData {
            step: step.into(),
            attempt,
            error: error.into(),
            timed_out,
        })
    }

    /// Creates a RetryScheduled event.
    pub fn retry_scheduled(step: impl Into<String>, attempt: u32, delay_ms: u64) -> Self {
        InstanceEvent::RetryScheduled(RetryScheduledData {
            step: step.into(),
            attempt,
            delay_ms,
        })
    }

    /// Creates a CompensationStarted event.
    pub fn compensation_started(reason: impl Into<String>, pending: Vec<String>) -> Self {
        InstanceEvent::CompensationStarted(CompensationStartedData {
            reason: reason.into(),
            pending,
        })
    }

    /// Creates a StepCompensationStarted event.
    pub fn step_compensation_started(step: impl Into<String>) -> Self {
        InstanceEvent::StepCompensationStarted(StepData { step: step.into() })
    }

    /// Creates a StepCompensated event.
    pub fn step_compensated(step: impl Into<String>) -> Self {
        InstanceEvent::StepCompensated(StepData { step: step.into() })
    }

    /// Creates a StepCompensationFailed event.
    pub fn step_compensation_failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        InstanceEvent::StepCompensationFailed(StepErrorData {
            step: step.into(),
            error: error.into(),
        })
    }

    /// Creates an InstanceSucceeded event.
    pub fn instance_succeeded() -> Self {
        InstanceEvent::InstanceSucceeded(CompletedData { at: Utc::now() })
    }

    /// Creates an InstanceCompensated event.
    pub fn instance_compensated() -> Self {
        InstanceEvent::InstanceCompensated(CompletedData { at: Utc::now() })
    }

    /// Creates an InstanceFailed event.
    pub fn instance_failed(reason: impl Into<String>) -> Self {
        InstanceEvent::InstanceFailed(InstanceFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
