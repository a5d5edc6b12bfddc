use common::InstanceId;
use thiserror::Error;

use crate::status::InstanceStatus;

/// Errors surfaced by the saga engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Definition lookup or registration failed.
    #[error(transparent)]
    Definition(#[from] definition::DefinitionError),

    /// No events exist for the requested instance.
    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// The requested operation is not valid for the instance's status.
    #[error("Instance {instance_id} is {status}; operation not permitted")]
    InvalidState {
        instance_id: InstanceId,
        status: InstanceStatus,
    },

    /// The instance store rejected or failed an operation.
    #[error(transparent)]
    Store(#[from] instance_store::InstanceStoreError),

    /// Event payload (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
