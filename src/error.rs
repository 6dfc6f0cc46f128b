//! Error handling for the telemetry gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Validation error (bad request input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Aggregation input exceeds the configured frame limit
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Upstream fetch error (frame archive)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Aggregation failure not attributable to the input
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// State store error
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "INVALID", msg.clone()),
            Error::LimitExceeded(msg) => (StatusCode::BAD_REQUEST, "LIMIT_EXCEEDED", msg.clone()),
            Error::Fetch(msg) => (StatusCode::BAD_GATEWAY, "FETCH_FAILED", msg.clone()),
            Error::Aggregation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AGGREGATION_FAILED",
                msg.clone(),
            ),
            Error::Store(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
