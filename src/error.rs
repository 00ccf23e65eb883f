//! Structured error types for API responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad, missing or forged identity token. Deliberately uniform: the
    /// response never reveals which verification step failed.
    AuthenticationFailure,
    /// Role or ownership check failed.
    Forbidden,
    /// Referenced task or user is absent.
    NotFound,
    /// Operation not valid for the task's current state.
    InvalidState,
    /// Role change aimed at a disallowed user.
    InvalidTarget,

    // Internal errors
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ErrorCode::AuthenticationFailure | ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidState | ErrorCode::InvalidTarget => StatusCode::BAD_REQUEST,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Structured error surfaced to API callers.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    // Convenience constructors

    pub fn auth_failed() -> Self {
        Self::new(ErrorCode::AuthenticationFailure, "authentication failed")
    }

    pub fn forbidden(reason: &str) -> Self {
        Self::new(ErrorCode::Forbidden, reason)
    }

    pub fn task_not_found(task_id: i64) -> Self {
        Self::new(ErrorCode::NotFound, format!("task not found: {}", task_id))
    }

    pub fn user_not_found(user_id: i64) -> Self {
        Self::new(ErrorCode::NotFound, format!("user not found: {}", user_id))
    }

    pub fn invalid_state(reason: &str) -> Self {
        Self::new(ErrorCode::InvalidState, reason)
    }

    pub fn invalid_target(reason: &str) -> Self {
        Self::new(ErrorCode::InvalidTarget, reason)
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Keep an already-typed error instead of wrapping it
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(err) => ApiError::database(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let body = serde_json::to_string(&self)
            .unwrap_or_else(|_| format!("{{\"code\":\"INTERNAL_ERROR\",\"message\":\"{}\"}}", self.message));
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

/// Result type for API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
