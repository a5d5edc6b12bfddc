//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use definition::DefinitionError;
use engine::EngineError;
use instance_store::InstanceStoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Request conflicts with current state.
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<DefinitionError> for ApiError {
    fn from(err: DefinitionError) -> Self {
        match &err {
            DefinitionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            DefinitionError::DuplicateVersion { .. } => ApiError::Conflict(err.to_string()),
            DefinitionError::InvalidDefinition(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Definition(inner) => inner.into(),
            not_found @ EngineError::InstanceNotFound(_) => {
                ApiError::NotFound(not_found.to_string())
            }
            invalid @ EngineError::InvalidState { .. } => ApiError::Conflict(invalid.to_string()),
            EngineError::Store(conflict @ InstanceStoreError::SequenceConflict { .. }) => {
                ApiError::Conflict(conflict.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}
