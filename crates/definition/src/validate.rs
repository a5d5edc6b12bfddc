//! Registration-time validation of workflow definitions.

use std::collections::{HashSet, VecDeque};

use thiserror::Error;

use crate::definition::WorkflowDefinition;

/// A rule violated by an invalid definition.
#[derive(Debug, Clone, Error)]
pub enum ValidationRule {
    /// The definition has no steps.
    #[error("definition has no steps")]
    EmptySteps,

    /// Two steps share a name.
    #[error("duplicate step name '{step}'")]
    DuplicateStepName { step: String },

    /// A dependency names a step that does not exist in the definition.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle involving steps {steps:?}")]
    DependencyCycle { steps: Vec<String> },

    /// A step's compensation target equals its invocation target.
    #[error("step '{step}' uses the same operation for invocation and compensation")]
    CompensationEqualsInvocation { step: String },
}

/// Validates a definition against all registration rules.
///
/// The step graph must be acyclic, every dependency must name a step in
/// the same definition, step names must be unique, and a step's
/// compensation target must differ from its invocation target.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), ValidationRule> {
    if def.steps.is_empty() {
        return Err(ValidationRule::EmptySteps);
    }

    let mut names = HashSet::new();
    for step in &def.steps {
        if !names.insert(step.name.as_str()) {
            return Err(ValidationRule::DuplicateStepName {
                step: step.name.clone(),
            });
        }
    }

    for step in &def.steps {
        for dep in &step.dependencies {
            if !names.contains(dep.as_str()) {
                return Err(ValidationRule::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    for step in &def.steps {
        if let Some(compensation) = &step.compensation
            && *compensation == step.invoke
        {
            return Err(ValidationRule::CompensationEqualsInvocation {
                step: step.name.clone(),
            });
        }
    }

    check_acyclic(def)
}

/// Kahn's algorithm; any nodes left with unresolved in-degree form a cycle.
fn check_acyclic(def: &WorkflowDefinition) -> Result<(), ValidationRule> {
    let mut in_degree: Vec<usize> = def.steps.iter().map(|s| s.dependencies.len()).collect();
    let mut queue: VecDeque<usize> = (0..def.steps.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut visited = 0;

    while let Some(i) = queue.pop_front() {
        visited += 1;
        let name = def.steps[i].name.as_str();
        for (j, step) in def.steps.iter().enumerate() {
            if step.dependencies.iter().any(|d| d == name) {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    queue.push_back(j);
                }
            }
        }
    }

    if visited == def.steps.len() {
        Ok(())
    } else {
        let steps = def
            .steps
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| s.name.clone())
            .collect();
        Err(ValidationRule::DependencyCycle { steps })
    }
}
