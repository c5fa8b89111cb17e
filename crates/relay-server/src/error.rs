//! Error types for the server.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::admission::QueueError;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The admission queue is at capacity.
    #[error("Queue is full (max {max_queue_size} waiting requests)")]
    QueueFull { max_queue_size: usize },

    /// Waited too long for a generation slot.
    #[error("Timed out after {}ms waiting for a generation slot", timeout.as_millis())]
    QueueTimeout { timeout: Duration },

    /// Service unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<QueueError> for ServerError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full { max_queue_size } => ServerError::QueueFull { max_queue_size },
            QueueError::Timeout { timeout } => ServerError::QueueTimeout { timeout },
            QueueError::Drained => ServerError::ServiceUnavailable(e.to_string()),
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::QueueFull { .. } => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
            ServerError::QueueTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, "queue_timeout"),
            ServerError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ServerError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
        };

        let message = self.to_string();

        match &self {
            ServerError::Internal(_) | ServerError::Serialization(_) => {
                tracing::error!(status = %status, code, error = %message, "Server error");
            }
            _ => {
                tracing::warn!(status = %status, code, error = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, ServerError::QueueFull { .. }) {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
