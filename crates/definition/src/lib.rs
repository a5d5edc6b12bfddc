//! Workflow definition model for the saga orchestration engine.
//!
//! A [`WorkflowDefinition`] is a versioned, immutable directed acyclic graph
//! of [`StepDefinition`]s. Definitions are validated once at registration
//! time and never mutated afterwards; publishing a change means registering
//! a new version. Instances always bind to the exact version that was
//! active when they were created.

pub mod definition;
pub mod error;
pub mod registry;
pub mod retry;
pub mod validate;

pub use definition::{
    DEFAULT_STEP_TIMEOUT, DefinitionRef, OperationRef, StepDefinition, WorkflowDefinition,
};
pub use error::DefinitionError;
pub use registry::DefinitionRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use validate::{ValidationRule, validate_definition};
