//! Error Types for TaskTree API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.
//! Cache problems never appear here; the cache layer absorbs them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tasktree_core::{PrivateRpcError, ShardError, TaskTreeError};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Request lacks valid authentication credentials
    Unauthorized,

    /// Private request signature did not verify
    InvalidSignature,

    /// Private request timestamp is outside the accepted window
    RequestExpired,

    /// Private request signature was already used
    ReplayDetected,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Operation conflicts with current state
    StateConflict,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Shard query failed
    ShardError,

    /// Service is temporarily unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized
            | ErrorCode::InvalidSignature
            | ErrorCode::RequestExpired
            | ErrorCode::ReplayDetected => StatusCode::UNAUTHORIZED,

            ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,

            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::StateConflict => StatusCode::CONFLICT,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError | ErrorCode::ShardError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::InvalidSignature => "Invalid request signature",
            ErrorCode::RequestExpired => "Request has expired",
            ErrorCode::ReplayDetected => "Request was already processed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ShardError => "Shard operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

/// Shard errors propagate to the client untouched in kind, without internals.
impl From<ShardError> for ApiError {
    fn from(err: ShardError) -> Self {
        match err {
            ShardError::NotFound { .. } => ApiError::from_code(ErrorCode::EntityNotFound),
            ShardError::Unavailable { shard, .. } => {
                tracing::error!(shard, error = %err, "Shard unavailable");
                ApiError::service_unavailable("Shard temporarily unavailable")
            }
            ShardError::Query { shard, .. } => {
                tracing::error!(shard, error = %err, "Shard query failed");
                ApiError::from_code(ErrorCode::ShardError)
            }
            ShardError::Decode { .. } => {
                tracing::error!(error = %err, "Shard returned unexpected rows");
                ApiError::from_code(ErrorCode::ShardError)
            }
        }
    }
}

impl From<PrivateRpcError> for ApiError {
    fn from(err: PrivateRpcError) -> Self {
        match err {
            PrivateRpcError::MissingParam { ref param } => ApiError::missing_field(param),
            PrivateRpcError::MalformedTimestamp { .. } => ApiError::invalid_format("ts", "unix millis"),
            PrivateRpcError::Expired { .. } => ApiError::from_code(ErrorCode::RequestExpired),
            PrivateRpcError::BadSignature => ApiError::from_code(ErrorCode::InvalidSignature),
            PrivateRpcError::Replayed => ApiError::from_code(ErrorCode::ReplayDetected),
            PrivateRpcError::Guard(ref store) => {
                tracing::error!(error = %store, "Replay guard unavailable");
                ApiError::service_unavailable("Replay guard unavailable")
            }
        }
    }
}

impl From<TaskTreeError> for ApiError {
    fn from(err: TaskTreeError) -> Self {
        match err {
            TaskTreeError::Shard(e) => e.into(),
            TaskTreeError::PrivateRpc(e) => e.into(),
            other => {
                tracing::error!(error = %other, "Unexpected internal error");
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::ReplayDetected.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::MissingField.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::EntityNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::ShardError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::ServiceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_shard_not_found_maps_to_404() {
        let err: ApiError = ShardError::NotFound { shard: 1 }.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_shard_query_does_not_leak_reason() {
        let err: ApiError = ShardError::Query {
            shard: 1,
            reason: "syntax error near SELECT".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::ShardError);
        assert!(!err.message.contains("SELECT"));
    }

    #[test]
    fn test_private_rpc_mapping() {
        let err: ApiError = PrivateRpcError::Replayed.into();
        assert_eq!(err.code, ErrorCode::ReplayDetected);

        let err: ApiError = PrivateRpcError::MissingParam {
            param: "_".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::MissingField);
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::entity_not_found("Project", "p1");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("ENTITY_NOT_FOUND"));
        assert!(json.contains("p1"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }
}
