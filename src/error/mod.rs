//! Centralized API error handling for LendLedger
//!
//! Maps the engine's error taxonomy onto HTTP status codes and the JSON
//! response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::{ApiResponse, FieldError};

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Validation failed")]
    FieldValidation(Vec<FieldError>),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Insufficient permissions: {0}")]
    Authorization(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Concurrent modification detected: {0}")]
    Concurrency(String),

    #[error("A request with this idempotency key is still being processed")]
    IdempotencyInFlight,

    #[error("Payment has already been refunded")]
    AlreadyRefunded,

    #[error("Payment provider error: {0}")]
    ProviderFailure(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) | ApiError::FieldValidation(_) => "VALIDATION_ERROR",
            ApiError::Authentication(_) => "AUTHENTICATION_ERROR",
            ApiError::Authorization(_) => "AUTHORIZATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InvalidTransition(_) => "INVALID_TRANSITION",
            ApiError::Concurrency(_) => "CONCURRENCY_CONFLICT",
            ApiError::IdempotencyInFlight => "IDEMPOTENCY_IN_FLIGHT",
            ApiError::AlreadyRefunded => "ALREADY_REFUNDED",
            ApiError::ProviderFailure(_) => "PROVIDER_FAILURE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::FieldValidation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            ApiError::Concurrency(_) => StatusCode::CONFLICT,
            ApiError::IdempotencyInFlight => StatusCode::CONFLICT,
            ApiError::AlreadyRefunded => StatusCode::CONFLICT,
            ApiError::ProviderFailure(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Field-level validation details, when present
    fn field_errors(&self) -> Option<Vec<FieldError>> {
        match self {
            ApiError::FieldValidation(fields) => Some(fields.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(_) | ApiError::ProviderFailure(_) => {
                tracing::error!(error = %message, code = %code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %code, "Client error occurred");
            }
        }

        let body: ApiResponse<()> = ApiResponse::failure(message, self.field_errors());

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::Conflict(format!(
                    "Uniqueness constraint violated: {}",
                    db_err.constraint().unwrap_or("unknown")
                ))
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let fields = err
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| FieldError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid value for {}", field)),
                })
            })
            .collect();
        ApiError::FieldValidation(fields)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::ProviderFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("Serialization failed: {}", err))
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

/// Serializable mirror of the taxonomy, used in audit snapshots
#[derive(Serialize)]
pub struct ErrorSummary {
    pub code: String,
    pub message: String,
}

impl From<&ApiError> for ErrorSummary {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::Validation("bad".to_string()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            ApiError::InvalidTransition("pending -> active".to_string()).error_code(),
            "INVALID_TRANSITION"
        );
        assert_eq!(ApiError::AlreadyRefunded.error_code(), "ALREADY_REFUNDED");
        assert_eq!(
            ApiError::IdempotencyInFlight.error_code(),
            "IDEMPOTENCY_IN_FLIGHT"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Authentication("no token".to_string()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Authorization("operator only".to_string()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Concurrency("version mismatch".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::ProviderFailure("declined".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::InvalidTransition("rejected -> active".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
