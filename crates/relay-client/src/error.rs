//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stream frame could not be decoded.
    #[error("Invalid stream frame: {0}")]
    Frame(#[from] relay_types::FrameError),

    /// Server returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error code from server.
        code: String,
        /// Error message from server.
        message: String,
    },

    /// The connection broke or the stream ended before a terminal event.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The caller cancelled the stream.
    #[error("Stream cancelled")]
    Cancelled,

    /// The server reported that generation failed.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error came from deliberate cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if this is a connection-level failure worth resuming from.
    ///
    /// Server answers (queue full, bad request), generation failures and
    /// cancellation are never retried.
    pub fn is_retryable_transport(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Http(e) => e.status().is_none(),
            _ => false,
        }
    }

    /// Check if the server turned the request away because it is at capacity.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Error::Api { code, .. } if code == "queue_full")
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status >= 500)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error response from the server.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::Transport("reset".into()).is_retryable_transport());
        assert!(!Error::Cancelled.is_retryable_transport());
        assert!(!Error::Generation("boom".into()).is_retryable_transport());

        let full = Error::Api {
            status: 503,
            code: "queue_full".into(),
            message: "Queue is full".into(),
        };
        assert!(!full.is_retryable_transport());
        assert!(full.is_queue_full());
        assert!(full.is_server_error());
    }
}
