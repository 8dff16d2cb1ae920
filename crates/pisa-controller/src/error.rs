//! Error types for pisa-controller

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pisa_types::{CodecError, Kind, ObjectKey};
use serde::Serialize;
use thiserror::Error;

/// Process-level errors
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Provider setup error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Manifest decoding error
    #[error("Manifest error: {0}")]
    Codec(#[from] CodecError),

    /// Leader election error
    #[error("Leader election error: {0}")]
    Lease(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Desired-state store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: Kind, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: Kind, key: ObjectKey },

    /// Optimistic concurrency failure
    #[error("{kind} {key} was modified: expected version {expected}, found {actual}")]
    Conflict {
        kind: Kind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// External database provider errors
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// No instance with this identifier
    #[error("DB instance {0} not found")]
    NotFound(String),

    /// Create raced with another create of the same identifier
    #[error("DB instance {0} already exists")]
    AlreadyExists(String),

    /// Any other API failure (throttling, network, validation)
    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Provider credentials error: {0}")]
    Credentials(String),
}

/// Errors surfaced by a reconcile pass
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The VirtualDatabase points at a DatabaseClass that does not exist
    #[error("DatabaseClass {class} not found")]
    ClassNotFound { class: ObjectKey },

    /// The DatabaseEndpoint exists but holds no password to create the
    /// instance with. Needs the credential restored by hand.
    #[error("DatabaseEndpoint {endpoint} has no master password, restore it before the DB instance can be created")]
    MissingCredential { endpoint: ObjectKey },

    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Cancellation happens on shutdown and is not retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Cancelled)
    }
}

/// Resource API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Store(StoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Store(StoreError::AlreadyExists { .. })
            | ApiError::Store(StoreError::Conflict { .. }) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Store(StoreError::Codec(_)) => (StatusCode::BAD_REQUEST, "INVALID_OBJECT"),
            ApiError::Store(StoreError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for process-level operations
pub type ControllerResult<T> = Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("x".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Store(StoreError::Conflict {
                kind: Kind::VirtualDatabase,
                key: ObjectKey::new("ns", "a"),
                expected: 1,
                actual: 2,
            })
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Store(StoreError::NotFound {
                kind: Kind::DatabaseClass,
                key: ObjectKey::new("ns", "a"),
            })
            .into_response()
            .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!ReconcileError::Cancelled.is_retryable());
        assert!(ReconcileError::ClassNotFound {
            class: ObjectKey::new("ns", "missing")
        }
        .is_retryable());
    }
}
