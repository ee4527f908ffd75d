//! API error types
//!
//! Every failure inside a request is recovered into one of these kinds before it
//! reaches the client. Credential failures and session failures each collapse to
//! a single caller-visible outcome; the specific cause stays in server logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::any::Any;

use crate::auth::{LoginFailure, SessionError};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired session")]
    Unauthorized,
    #[error("Session store exhausted")]
    StoreExhausted,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::StoreExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::MalformedRequest(_) => "Invalid JSON payload",
            ApiError::InvalidCredentials => "Invalid credentials",
            ApiError::Unauthorized => "Invalid or expired session",
            ApiError::StoreExhausted => "Service temporarily unavailable",
            ApiError::Database(detail) | ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed with server error");
                "Internal server error"
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound | SessionError::Expired => ApiError::Unauthorized,
            SessionError::StoreExhausted => ApiError::StoreExhausted,
        }
    }
}

impl From<LoginFailure> for ApiError {
    fn from(_: LoginFailure) -> Self {
        ApiError::InvalidCredentials
    }
}

/// Response for a handler that panicked, used with tower-http's `CatchPanicLayer`
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    ApiError::Internal(format!("handler panicked: {}", detail)).into_response()
}
