//! Definition and registry error types.

use thiserror::Error;

use crate::validate::ValidationRule;

/// Errors from definition registration and lookup.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    /// A definition with this (name, version) is already registered.
    #[error("Definition {name}@v{version} is already registered")]
    DuplicateVersion { name: String, version: u32 },

    /// No definition registered under the requested name/version.
    #[error("Definition not found: {0}")]
    NotFound(String),

    /// The definition violated a validation rule at registration time.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(ValidationRule),
}

/// Convenience type alias for definition results.
pub type Result<T> = std::result::Result<T, DefinitionError>;
