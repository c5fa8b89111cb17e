//! Error types for buffer operations.

/// Error type for buffer operations.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// An event id did not have the `{run_id}:{sequence}` shape.
    #[error("Malformed event id: {0}")]
    MalformedEventId(String),
}

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;
