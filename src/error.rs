//! Engine-wide error type
//!
//! Every fallible engine and store operation returns [`AppResult`]. The HTTP
//! layer renders an [`AppError`] as `{error, message, timestamp}` JSON.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::config::ConfigError;
use crate::models::TimerSessionError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Rejected transition or invalid timer settings
    #[error("Timer session error: {0}")]
    TimerSession(#[from] TimerSessionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A store write did not commit
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A stored row could not be mapped back to a record
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Session not found")]
    SessionNotFound,

    /// The stored session has ended and accepts no further writes
    #[error("Session has been terminated")]
    SessionTerminated,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::TimerSession(_) | AppError::Validation(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::SessionNotFound | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SessionTerminated => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Configuration(_)
            | AppError::Serialization(_)
            | AppError::Persistence(_)
            | AppError::CorruptRecord(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for API clients
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DatabaseError",
            AppError::TimerSession(_) => "TimerSessionError",
            AppError::Configuration(_) => "ConfigurationError",
            AppError::Serialization(_) => "SerializationError",
            AppError::Persistence(_) => "PersistenceError",
            AppError::CorruptRecord(_) => "CorruptRecord",
            AppError::Validation(_) => "ValidationError",
            AppError::NotFound(_) => "NotFound",
            AppError::BadRequest(_) => "BadRequest",
            AppError::Internal(_) => "InternalError",
            AppError::SessionNotFound => "SessionNotFound",
            AppError::SessionTerminated => "SessionTerminated",
        }
    }

    /// Server-side failures are logged at error level, client mistakes at warn
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        AppError::Persistence(message.into())
    }

    pub fn validation_error(message: &str) -> Self {
        AppError::Validation(message.to_string())
    }

    pub fn not_found(resource: &str) -> Self {
        AppError::NotFound(format!("{} not found", resource))
    }

    pub fn bad_request(message: &str) -> Self {
        AppError::BadRequest(message.to_string())
    }

    pub fn internal_error(message: &str) -> Self {
        AppError::Internal(message.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        } else {
            tracing::warn!(error = %self, code = self.error_code(), "Request rejected");
        }

        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "timestamp": Utc::now().timestamp()
        });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
