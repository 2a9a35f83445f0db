/// Unified error types for the help-desk account service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for account, credential and session operations
#[derive(Error, Debug)]
pub enum AuthError {
    /// Backing store unreachable or failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    /// Malformed input (empty username, empty role set, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// No account, code or session matches
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation on username or invitation code
    #[error("Conflict: {0}")]
    Conflict(String),

    /// One-time code is past its validity window
    #[error("One-time code has expired")]
    ExpiredCode,

    /// One-time code does not match the pending one
    #[error("One-time code does not match")]
    WrongCode,

    /// Account has no pending one-time code
    #[error("No one-time code pending for {0}")]
    NoPendingCode(String),

    /// Account holds no role and cannot be used
    #[error("No roles assigned to {0}")]
    NoRolesAssigned(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Only storage failures are transient; everything else needs corrected
    /// input or administrative action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StorageUnavailable(_))
    }

    /// Map a sqlx error, turning unique-constraint violations into `Conflict`.
    pub(crate) fn from_write(err: sqlx::Error, conflict: impl FnOnce() -> String) -> Self {
        let unique = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);

        if unique {
            AuthError::Conflict(conflict())
        } else {
            AuthError::StorageUnavailable(err)
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert AuthError to HTTP response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string()),
            AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            AuthError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            AuthError::ExpiredCode => (StatusCode::BAD_REQUEST, "ExpiredCode", self.to_string()),
            AuthError::WrongCode => (StatusCode::BAD_REQUEST, "WrongCode", self.to_string()),
            AuthError::NoPendingCode(_) => {
                (StatusCode::BAD_REQUEST, "NoPendingCode", self.to_string())
            }
            AuthError::NoRolesAssigned(_) => {
                (StatusCode::FORBIDDEN, "NoRolesAssigned", self.to_string())
            }
            AuthError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            AuthError::Authorization(_) => (StatusCode::FORBIDDEN, "Forbidden", self.to_string()),
            AuthError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            AuthError::StorageUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "StorageUnavailable",
                "Storage unavailable".to_string(), // Don't leak details
            ),
            AuthError::Internal(_) | AuthError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for account operations
pub type AuthResult<T> = Result<T, AuthError>;
