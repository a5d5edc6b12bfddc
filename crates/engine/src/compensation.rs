//! Compensation planning: which steps to undo, and in what order.

use definition::WorkflowDefinition;

use crate::instance::{CompensationStatus, WorkflowInstance};

/// Result of one compensation walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationResult {
    /// Every eligible compensation completed.
    Completed,
    /// The walk halted at a step whose compensation failed. Later
    /// compensations in the plan did not run.
    Partial { failed_step: String, error: String },
}

/// Computes the compensation plan for an instance: succeeded steps that
/// declare a compensation target, in reverse dependency order.
///
/// Steps that never succeeded are excluded (there is nothing to undo),
/// as are succeeded steps without a compensation target. Steps already
/// compensated in an earlier, interrupted walk are excluded too, so a
/// resumed walk picks up where the previous one stopped.
pub fn plan(definition: &WorkflowDefinition, instance: &WorkflowInstance) -> Vec<String> {
    definition
        .topological_order()
        .into_iter()
        .rev()
        .filter(|name| instance.step_succeeded(name))
        .filter(|name| {
            definition
                .step(name)
                .is_some_and(|step| step.compensation.is_some())
        })
        .filter(|name| {
            instance
                .latest_record(name)
                .is_none_or(|r| r.compensation != CompensationStatus::Succeeded)
        })
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InstanceEvent;
    use crate::instance::Context;
    use common::InstanceId;
    use definition::{DefinitionRef, StepDefinition};

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "order_fulfillment",
            1,
            vec![
                StepDefinition::new("reserve", "inventory", "reserve")
                    .with_compensation("inventory", "release"),
                StepDefinition::new("charge", "payment", "charge")
                    .depends_on("reserve")
                    .with_compensation("payment", "refund"),
                StepDefinition::new("ship", "shipping", "create").depends_on("charge"),
            ],
        )
    }

    fn instance_with(events: Vec<InstanceEvent>) -> WorkflowInstance {
        let mut instance = WorkflowInstance::default();
        instance.apply(InstanceEvent::instance_started(
            InstanceId::new(),
            DefinitionRef::new("order_fulfillment", 1),
            Context::new(),
        ));
        instance.apply_events(events);
        instance
    }

    fn succeeded(step: &str) -> Vec<InstanceEvent> {
        vec![
            InstanceEvent::step_started(step, 1),
            InstanceEvent::step_succeeded(step, 1, serde_json::json!({})),
        ]
    }

    #[test]
    fn plan_reverses_completion_order() {
        let mut events = succeeded("reserve");
        events.extend(succeeded("charge"));
        let instance = instance_with(events);

        assert_eq!(plan(&definition(), &instance), ["charge", "reserve"]);
    }

    #[test]
    fn failed_step_is_not_in_plan() {
        let mut events = succeeded("reserve");
        events.push(InstanceEvent::step_started("charge", 1));
        events.push(InstanceEvent::step_failed("charge", 1, "declined", false));
        let instance = instance_with(events);

        assert_eq!(plan(&definition(), &instance), ["reserve"]);
    }

    #[test]
    fn step_without_compensation_target_is_skipped() {
        let mut events = succeeded("reserve");
        events.extend(succeeded("charge"));
        events.extend(succeeded("ship"));
        let instance = instance_with(events);

        // "ship" succeeded but declares no compensation.
        assert_eq!(plan(&definition(), &instance), ["charge", "reserve"]);
    }

    #[test]
    fn already_compensated_steps_are_excluded_on_resume() {
        let mut events = succeeded("reserve");
        events.extend(succeeded("charge"));
        events.push(InstanceEvent::compensation_started("forced", vec![
            "charge".into(),
            "reserve".into(),
        ]));
        events.push(InstanceEvent::step_compensation_started("charge"));
        events.push(InstanceEvent::step_compensated("charge"));
        let instance = instance_with(events);

        assert_eq!(plan(&definition(), &instance), ["reserve"]);
    }

    #[test]
    fn empty_plan_when_nothing_succeeded() {
        let instance = instance_with(vec![
            InstanceEvent::step_started("reserve", 1),
            InstanceEvent::step_failed("reserve", 1, "out of stock", false),
        ]);

        assert!(plan(&definition(), &instance).is_empty());
    }

    #[test]
    fn diamond_plan_unwinds_dependents_before_dependencies() {
        let def = WorkflowDefinition::new(
            "diamond",
            1,
            vec![
                StepDefinition::new("a", "svc", "op").with_compensation("svc", "undo_a"),
                StepDefinition::new("b", "svc", "op")
                    .depends_on("a")
                    .with_compensation("svc", "undo_b"),
                StepDefinition::new("c", "svc", "op")
                    .depends_on("a")
                    .with_compensation("svc", "undo_c"),
                StepDefinition::new("d", "svc", "op")
                    .depends_on("b")
                    .depends_on("c")
                    .with_compensation("svc", "undo_d"),
            ],
        );
        let mut events = Vec::new();
        for step in ["a", "b", "c", "d"] {
            events.extend(succeeded(step));
        }
        let instance = instance_with(events);

        let plan = plan(&def, &instance);
        let pos = |n: &str| plan.iter().position(|s| s == n).unwrap();
        assert_eq!(plan.len(), 4);
        assert!(pos("d") < pos("b"));
        assert!(pos("d") < pos("c"));
        assert!(pos("b") < pos("a"));
        assert!(pos("c") < pos("a"));
    }
}
