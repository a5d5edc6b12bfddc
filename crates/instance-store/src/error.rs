use thiserror::Error;

use crate::{InstanceId, Sequence};

/// Errors that can occur when interacting with the instance store.
#[derive(Debug, Error)]
pub enum InstanceStoreError {
    /// The expected sequence did not match the log's current tail.
    /// Another writer appended to the same instance first.
    #[error(
        "Sequence conflict for instance {instance_id}: expected sequence {expected}, found {actual}"
    )]
    SequenceConflict {
        instance_id: InstanceId,
        expected: Sequence,
        actual: Sequence,
    },

    /// The append batch itself was malformed (empty, mixed instances,
    /// or non-sequential).
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for instance store operations.
pub type Result<T> = std::result::Result<T, InstanceStoreError>;
