//! The workflow instance aggregate and its step ledger.

use std::collections::HashMap;

use common::InstanceId;
use definition::DefinitionRef;
use serde::{Deserialize, Serialize};

use crate::events::InstanceEvent;
use crate::status::InstanceStatus;

/// Key-value context threaded between steps of one instance.
///
/// Step result fragments are merged under keys namespaced by step name,
/// e.g. a `reservation_id` returned by `reserve_inventory` lands under
/// `"reserve_inventory.reservation_id"`.
pub type Context = HashMap<String, serde_json::Value>;

/// Outcome of the most recent attempt of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// The attempt has been recorded but has not finished.
    Pending,
    /// The attempt succeeded.
    Succeeded,
    /// The call completed but reported a business failure.
    Failed,
    /// No response arrived within the step's timeout.
    TimedOut,
}

impl StepOutcome {
    /// Returns true for Failed or TimedOut; both are retryable.
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed | StepOutcome::TimedOut)
    }
}

/// Compensation progress for a step, once unwinding has been triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationStatus {
    /// The step is not eligible for compensation (it never succeeded,
    /// has no compensation target, or unwinding has not started).
    NotApplicable,
    /// The step's compensation is queued but has not completed.
    Pending,
    /// The step's compensation completed.
    Succeeded,
    /// The step's compensation failed; manual re-trigger required.
    Failed,
}

/// One attempt record in an instance's step ledger.
///
/// The ledger is append-only: a retry appends a new record with an
/// incremented attempt number, it never rewrites an earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// The step name.
    pub step: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Outcome of this attempt.
    pub outcome: StepOutcome,
    /// Error detail if the attempt failed.
    pub error: Option<String>,
    /// Compensation progress for this attempt.
    pub compensation: CompensationStatus,
    /// Error detail if the compensation failed.
    pub compensation_error: Option<String>,
}

/// A workflow instance, rebuilt by replaying its transition events.
///
/// Mutated exclusively through [`WorkflowInstance::apply`], which is pure
/// and deterministic: replaying the same event history any number of
/// times yields identical state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInstance {
    id: Option<InstanceId>,
    workflow: Option<DefinitionRef>,
    status: InstanceStatus,
    context: Context,
    ledger: Vec<StepExecution>,
    failure_reason: Option<String>,
}

impl WorkflowInstance {
    /// Applies a transition event, updating instance state.
    pub fn apply(&mut self, event: InstanceEvent) {
        match event {
            InstanceEvent::InstanceStarted(data) => {
                self.id = Some(data.instance_id);
                self.workflow = Some(data.workflow);
                self.context = data.initial_context;
                self.status = InstanceStatus::Running;
            }
            InstanceEvent::StepStarted(data) => {
                self.ledger.push(StepExecution {
                    step: data.step,
                    attempt: data.attempt,
                    outcome: StepOutcome::Pending,
                    error: None,
                    compensation: CompensationStatus::NotApplicable,
                    compensation_error: None,
                });
            }
            InstanceEvent::StepSucceeded(data) => {
                if let Some(record) = self.attempt_record_mut(&data.step, data.attempt) {
                    record.outcome = StepOutcome::Succeeded;
                }
                merge_output(&mut self.context, &data.step, data.output);
            }
            InstanceEvent::StepFailed(data) => {
                if let Some(record) = self.attempt_record_mut(&data.step, data.attempt) {
                    record.outcome = if data.timed_out {
                        StepOutcome::TimedOut
                    } else {
                        StepOutcome::Failed
                    };
                    record.error = Some(data.error.clone());
                }
                self.failure_reason = Some(format!("step '{}': {}", data.step, data.error));
            }
            InstanceEvent::RetryScheduled(_) => {
                // Informational; the attempt itself appends a new record.
            }
            InstanceEvent::CompensationStarted(data) => {
                self.status = InstanceStatus::Compensating;
                for step in &data.pending {
                    if let Some(record) = self.latest_record_mut(step)
                        && record.outcome == StepOutcome::Succeeded
                    {
                        record.compensation = CompensationStatus::Pending;
                    }
                }
            }
            InstanceEvent::StepCompensationStarted(_) => {
                // Write-ahead marker; progress lands in the next event.
            }
            InstanceEvent::StepCompensated(data) => {
                if let Some(record) = self.latest_record_mut(&data.step) {
                    record.compensation = CompensationStatus::Succeeded;
                }
            }
            InstanceEvent::StepCompensationFailed(data) => {
                if let Some(record) = self.latest_record_mut(&data.step) {
                    record.compensation = CompensationStatus::Failed;
                    record.compensation_error = Some(data.error.clone());
                }
                self.failure_reason =
                    Some(format!("compensation of '{}': {}", data.step, data.error));
            }
            InstanceEvent::InstanceSucceeded(_) => {
                self.status = InstanceStatus::Succeeded;
            }
            InstanceEvent::InstanceCompensated(_) => {
                self.status = InstanceStatus::Compensated;
            }
            InstanceEvent::InstanceFailed(data) => {
                self.status = InstanceStatus::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }

    /// Applies multiple events in sequence.
    pub fn apply_events(&mut self, events: impl IntoIterator<Item = InstanceEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    fn attempt_record_mut(&mut self, step: &str, attempt: u32) -> Option<&mut StepExecution> {
        self.ledger
            .iter_mut()
            .find(|r| r.step == step && r.attempt == attempt)
    }

    fn latest_record_mut(&mut self, step: &str) -> Option<&mut StepExecution> {
        self.ledger.iter_mut().rev().find(|r| r.step == step)
    }
}

// Query methods
impl WorkflowInstance {
    /// Returns the instance ID, or None before the first event.
    pub fn id(&self) -> Option<InstanceId> {
        self.id
    }

    /// Returns the definition this instance is bound to.
    pub fn workflow(&self) -> Option<&DefinitionRef> {
        self.workflow.as_ref()
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Returns the instance context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Returns the full step ledger, oldest attempt first.
    pub fn ledger(&self) -> &[StepExecution] {
        &self.ledger
    }

    /// Returns the number of attempts recorded for a step.
    pub fn attempts(&self, step: &str) -> u32 {
        self.ledger.iter().filter(|r| r.step == step).count() as u32
    }

    /// Returns the latest attempt record for a step.
    pub fn latest_record(&self, step: &str) -> Option<&StepExecution> {
        self.ledger.iter().rev().find(|r| r.step == step)
    }

    /// Returns the outcome of a step's latest attempt.
    pub fn last_outcome(&self, step: &str) -> Option<StepOutcome> {
        self.latest_record(step).map(|r| r.outcome)
    }

    /// Returns true if the step's latest attempt succeeded.
    pub fn step_succeeded(&self, step: &str) -> bool {
        self.last_outcome(step) == Some(StepOutcome::Succeeded)
    }

    /// Returns names of steps whose latest attempt succeeded, in the
    /// order they first appear in the ledger.
    pub fn succeeded_steps(&self) -> Vec<&str> {
        let mut steps: Vec<&str> = Vec::new();
        for record in &self.ledger {
            if !steps.contains(&record.step.as_str()) && self.step_succeeded(&record.step) {
                steps.push(&record.step);
            }
        }
        steps
    }

    /// Returns names of all steps with at least one attempt.
    pub fn attempted_steps(&self) -> Vec<&str> {
        let mut steps: Vec<&str> = Vec::new();
        for record in &self.ledger {
            if !steps.contains(&record.step.as_str()) {
                steps.push(&record.step);
            }
        }
        steps
    }

    /// Returns the record of a step whose compensation failed, if any.
    ///
    /// A failed compensation is never re-run automatically; it needs a
    /// manual re-trigger, so a resumed unwinding walk halts here.
    pub fn failed_compensation(&self) -> Option<&StepExecution> {
        self.ledger
            .iter()
            .find(|r| r.compensation == CompensationStatus::Failed)
    }

    /// Returns the most recent failure detail, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

/// Merges a step's result fragment into the context under namespaced keys.
///
/// Object fragments merge per key as `"{step}.{key}"`; any other non-null
/// fragment lands under `"{step}.result"`.
pub fn merge_output(context: &mut Context, step: &str, output: serde_json::Value) {
    match output {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                context.insert(format!("{step}.{key}"), value);
            }
        }
        serde_json::Value::Null => {}
        other => {
            context.insert(format!("{step}.result"), other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: InstanceId) -> InstanceEvent {
        InstanceEvent::instance_started(id, DefinitionRef::new("wf", 1), Context::new())
    }

    #[test]
    fn default_instance_is_empty() {
        let instance = WorkflowInstance::default();
        assert!(instance.id().is_none());
        assert!(instance.ledger().is_empty());
    }

    #[test]
    fn apply_instance_started() {
        let mut instance = WorkflowInstance::default();
        let id = InstanceId::new();
        let mut initial = Context::new();
        initial.insert("order_id".into(), serde_json::json!("ORD-7"));

        instance.apply(InstanceEvent::instance_started(
            id,
            DefinitionRef::new("order_fulfillment", 2),
            initial,
        ));

        assert_eq!(instance.id(), Some(id));
        assert_eq!(instance.workflow().unwrap().version, 2);
        assert_eq!(instance.status(), InstanceStatus::Running);
        assert_eq!(
            instance.context().get("order_id"),
            Some(&serde_json::json!("ORD-7"))
        );
    }

    #[test]
    fn step_lifecycle_updates_ledger_and_context() {
        let mut instance = WorkflowInstance::default();
        instance.apply(started(InstanceId::new()));

        instance.apply(InstanceEvent::step_started("reserve", 1));
        assert_eq!(instance.last_outcome("reserve"), Some(StepOutcome::Pending));

        instance.apply(InstanceEvent::step_succeeded(
            "reserve",
            1,
            serde_json::json!({"reservation_id": "RES-123"}),
        ));
        assert!(instance.step_succeeded("reserve"));
        assert_eq!(
            instance.context().get("reserve.reservation_id"),
            Some(&serde_json::json!("RES-123"))
        );
    }

    #[test]
    fn retry_appends_new_attempt_record() {
        let mut instance = WorkflowInstance::default();
        instance.apply(started(InstanceId::new()));

        instance.apply(InstanceEvent::step_started("charge", 1));
        instance.apply(InstanceEvent::step_failed("charge", 1, "declined", false));
        instance.apply(InstanceEvent::retry_scheduled("charge", 1, 1000));
        instance.apply(InstanceEvent::step_started("charge", 2));
        instance.apply(InstanceEvent::step_succeeded(
            "charge",
            2,
            serde_json::json!({"payment_id": "PAY-9"}),
        ));

        assert_eq!(instance.attempts("charge"), 2);
        assert_eq!(instance.ledger().len(), 2);
        assert_eq!(instance.ledger()[0].outcome, StepOutcome::Failed);
        assert_eq!(instance.ledger()[0].error.as_deref(), Some("declined"));
        assert_eq!(instance.ledger()[1].outcome, StepOutcome::Succeeded);
        assert!(instance.step_succeeded("charge"));
    }

    #[test]
    fn timeout_recorded_distinctly_from_failure() {
        let mut instance = WorkflowInstance::default();
        instance.apply(started(InstanceId::new()));

        instance.apply(InstanceEvent::step_started("ship", 1));
        instance.apply(InstanceEvent::step_failed(
            "ship",
            1,
            "no response within 30s",
            true,
        ));

        assert_eq!(instance.last_outcome("ship"), Some(StepOutcome::TimedOut));
        assert!(instance.last_outcome("ship").unwrap().is_failure());
    }

    #[test]
    fn compensation_lifecycle() {
        let mut instance = WorkflowInstance::default();
        instance.apply(started(InstanceId::new()));

        instance.apply(InstanceEvent::step_started("reserve", 1));
        instance.apply(InstanceEvent::step_succeeded(
            "reserve",
            1,
            serde_json::json!({}),
        ));
        instance.apply(InstanceEvent::step_started("charge", 1));
        instance.apply(InstanceEvent::step_failed("charge", 1, "declined", false));

        instance.apply(InstanceEvent::compensation_started("charge gave up", vec![
            "reserve".into(),
        ]));
        assert_eq!(instance.status(), InstanceStatus::Compensating);
        assert_eq!(
            instance.latest_record("reserve").unwrap().compensation,
            CompensationStatus::Pending
        );
        // The failed step never succeeded, so it stays not-applicable.
        assert_eq!(
            instance.latest_record("charge").unwrap().compensation,
            CompensationStatus::NotApplicable
        );

        instance.apply(InstanceEvent::step_compensation_started("reserve"));
        instance.apply(InstanceEvent::step_compensated("reserve"));
        assert_eq!(
            instance.latest_record("reserve").unwrap().compensation,
            CompensationStatus::Succeeded
        );

        instance.apply(InstanceEvent::instance_compensated());
        assert_eq!(instance.status(), InstanceStatus::Compensated);
        assert!(instance.status().is_terminal());
    }

    #[test]
    fn failed_compensation_marks_record_and_reason() {
        let mut instance = WorkflowInstance::default();
        instance.apply(started(InstanceId::new()));

        instance.apply(InstanceEvent::step_started("reserve", 1));
        instance.apply(InstanceEvent::step_succeeded(
            "reserve",
            1,
            serde_json::json!({}),
        ));
        instance.apply(InstanceEvent::compensation_started("forced", vec![
            "reserve".into(),
        ]));
        instance.apply(InstanceEvent::step_compensation_started("reserve"));
        instance.apply(InstanceEvent::step_compensation_failed(
            "reserve",
            "service unavailable",
        ));
        instance.apply(InstanceEvent::instance_failed(
            "compensation halted at 'reserve'",
        ));

        assert_eq!(instance.status(), InstanceStatus::Failed);
        let record = instance.latest_record("reserve").unwrap();
        assert_eq!(record.compensation, CompensationStatus::Failed);
        assert_eq!(
            record.compensation_error.as_deref(),
            Some("service unavailable")
        );
        assert_eq!(instance.failed_compensation().unwrap().step, "reserve");
        assert_eq!(
            instance.failure_reason(),
            Some("compensation halted at 'reserve'")
        );
    }

    #[test]
    fn succeeded_steps_in_first_attempt_order() {
        let mut instance = WorkflowInstance::default();
        instance.apply(started(InstanceId::new()));

        for step in ["a", "b", "c"] {
            instance.apply(InstanceEvent::step_started(step, 1));
        }
        instance.apply(InstanceEvent::step_succeeded("b", 1, serde_json::json!({})));
        instance.apply(InstanceEvent::step_succeeded("a", 1, serde_json::json!({})));
        instance.apply(InstanceEvent::step_failed("c", 1, "boom", false));

        assert_eq!(instance.succeeded_steps(), ["a", "b"]);
        assert_eq!(instance.attempted_steps(), ["a", "b", "c"]);
    }

    #[test]
    fn merge_output_namespaces_keys() {
        let mut context = Context::new();
        merge_output(
            &mut context,
            "reserve",
            serde_json::json!({"id": "RES-1", "count": 2}),
        );
        merge_output(&mut context, "rate", serde_json::json!(0.17));
        merge_output(&mut context, "noop", serde_json::Value::Null);

        assert_eq!(context.get("reserve.id"), Some(&serde_json::json!("RES-1")));
        assert_eq!(context.get("reserve.count"), Some(&serde_json::json!(2)));
        assert_eq!(context.get("rate.result"), Some(&serde_json::json!(0.17)));
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn replay_is_deterministic() {
        let id = InstanceId::new();
        let events = vec![
            started(id),
            InstanceEvent::step_started("a", 1),
            InstanceEvent::step_succeeded("a", 1, serde_json::json!({"k": "v"})),
            InstanceEvent::step_started("b", 1),
            InstanceEvent::step_failed("b", 1, "boom", false),
            InstanceEvent::compensation_started("b gave up", vec!["a".into()]),
            InstanceEvent::step_compensation_started("a"),
            InstanceEvent::step_compensated("a"),
            InstanceEvent::instance_compensated(),
        ];

        let mut first = WorkflowInstance::default();
        first.apply_events(events.clone());
        let mut second = WorkflowInstance::default();
        second.apply_events(events);

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }
}
