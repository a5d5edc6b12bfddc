//! Saga execution engine.
//!
//! Drives one workflow instance at a time from `Running` to a terminal
//! status, invoking steps through a transport-agnostic service router,
//! consulting each step's retry policy on failure, and unwinding through
//! registered compensations when a step gives up. Every transition is
//! appended to the instance store before it is acted upon, so instance
//! state can always be rebuilt by replay.

pub mod compensation;
pub mod engine;
pub mod error;
pub mod events;
pub mod instance;
pub mod invoker;
pub mod publisher;
pub mod repository;
pub mod status;

pub use compensation::CompensationResult;
pub use engine::Engine;
pub use error::EngineError;
pub use events::InstanceEvent;
pub use instance::{
    CompensationStatus, Context, StepExecution, StepOutcome, WorkflowInstance,
};
pub use invoker::{
    Behavior, InMemoryServiceRouter, InvokeOutcome, ServiceFailure, ServiceRouter, StepInvoker,
};
pub use publisher::{NullPublisher, OutcomePublisher, RecordingPublisher, WorkflowOutcome};
pub use repository::{InstanceRepository, InstanceSummary};
pub use status::InstanceStatus;
