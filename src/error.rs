// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling for the HTTP surface and the chat dispatcher.
///
/// The messages of the user-facing variants are written so they can be sent
/// to a learner as-is.
#[derive(Debug)]
pub enum AppError {
    // 404 Not Found (quiz, question, subscription)
    NotFound(String),

    // 409 Conflict (duplicate name, already subscribed, question already open)
    Conflict(String),

    // 400 Bad Request (malformed quota, bad question kind, too few answers)
    Validation(String),

    // 403 Forbidden
    Forbidden(String),

    // 401 Unauthorized
    AuthError(String),

    // 502 Bad Gateway (chat transport send/join/sync)
    Transport(String),

    // 500 Internal Server Error
    Storage(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "conflict: {}", msg),
            AppError::Validation(msg) => write!(f, "validation error: {}", msg),
            AppError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            AppError::AuthError(msg) => write!(f, "authentication error: {}", msg),
            AppError::Transport(msg) => write!(f, "transport error: {}", msg),
            AppError::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Text sent back over chat when an operation fails.
    ///
    /// Internal failures are logged here and replaced by a generic apology.
    pub fn chat_reply(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg)
            | AppError::Forbidden(msg) => msg.clone(),
            AppError::AuthError(_) | AppError::Transport(_) | AppError::Storage(_) => {
                tracing::error!("Chat command failed: {}", self);
                "Sorry, something went wrong on my side. Please try again later.".to_string()
            }
        }
    }
}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Storage(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Transport(msg) => {
                tracing::error!("Transport Error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Chat transport unavailable".to_string())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::Storage`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

impl From<roxmltree::Error> for AppError {
    fn from(err: roxmltree::Error) -> Self {
        AppError::Validation(format!("Malformed quiz XML: {}", err))
    }
}

/// True when a database error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
