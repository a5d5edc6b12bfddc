//! Workflow and step definition types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Default per-attempt timeout for a step invocation.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// A remotely callable operation, identified by service and operation name.
///
/// The engine is transport-agnostic: an `OperationRef` is resolved to an
/// actual call by the service router configured at engine construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationRef {
    /// The owning service (e.g., "inventory").
    pub service: String,
    /// The operation within that service (e.g., "reserve").
    pub operation: String,
}

impl OperationRef {
    /// Creates an operation reference.
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }
}

impl std::fmt::Display for OperationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.operation)
    }
}

/// Reference to a specific published workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionRef {
    /// The workflow name.
    pub name: String,
    /// The definition version.
    pub version: u32,
}

impl DefinitionRef {
    /// Creates a definition reference.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// One step in a workflow definition.
///
/// A step names its invocation target, the steps it depends on, a
/// per-attempt timeout, a retry policy, and an optional compensation
/// target that semantically undoes the invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name, unique within the definition.
    pub name: String,
    /// The operation invoked when the step runs.
    pub invoke: OperationRef,
    /// The inverse operation, invoked only if this step succeeded
    /// and the workflow later unwinds.
    pub compensation: Option<OperationRef>,
    /// Names of steps that must have succeeded before this step runs.
    pub dependencies: Vec<String>,
    /// Per-attempt timeout for the invocation.
    pub timeout: Duration,
    /// Retry policy applied on failure or timeout.
    pub retry: RetryPolicy,
}

impl StepDefinition {
    /// Creates a step with default timeout and retry policy.
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            invoke: OperationRef::new(service, operation),
            compensation: None,
            dependencies: Vec::new(),
            timeout: DEFAULT_STEP_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    /// Sets the compensation target.
    pub fn with_compensation(
        mut self,
        service: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        self.compensation = Some(OperationRef::new(service, operation));
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A versioned, immutable workflow definition.
///
/// The steps form a directed acyclic graph via their `dependencies` edges.
/// Construction does not validate the graph; [`crate::validate_definition`]
/// is applied by the registry before a definition is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name, shared across versions.
    pub name: String,
    /// Version, unique per name.
    pub version: u32,
    /// The step graph.
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Creates a definition from its parts.
    pub fn new(name: impl Into<String>, version: u32, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            version,
            steps,
        }
    }

    /// Returns a reference identifying this definition.
    pub fn definition_ref(&self) -> DefinitionRef {
        DefinitionRef::new(self.name.clone(), self.version)
    }

    /// Looks up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns all step names in declaration order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// Returns the names of steps that directly depend on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.dependencies.iter().any(|d| d == name))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Returns step names in a topological order (dependencies first).
    ///
    /// Assumes the definition has passed validation; on a cyclic graph the
    /// returned order is truncated at the cycle.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: Vec<usize> = self.steps.iter().map(|s| s.dependencies.len()).collect();
        let mut order = Vec::with_capacity(self.steps.len());
        let mut ready: Vec<usize> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        while let Some(i) = ready.pop() {
            let name = self.steps[i].name.as_str();
            order.push(name);
            for (j, step) in self.steps.iter().enumerate() {
                if step.dependencies.iter().any(|d| d == name) {
                    in_degree[j] -= 1;
                    if in_degree[j] == 0 {
                        ready.push(j);
                    }
                }
            }
        }

        order
    }
}
