//! Application state shared across handlers.

use std::sync::Arc;

use axum::http::HeaderValue;
use relay_buffer::RunEventBuffer;
use relay_types::StreamRequest;
use tracing::warn;

use crate::admission::AdmissionQueue;
use crate::config::ServerConfig;
use crate::generator::{Generator, SharedGenerator};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The generator behind `POST /stream`.
    pub generator: SharedGenerator,

    /// Whether the generator supports resumable runs. Fixed at construction.
    pub durable: bool,

    /// Concurrency gate for generations.
    pub queue: AdmissionQueue,

    /// Buffered events of durable runs.
    pub buffer: RunEventBuffer,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(generator: impl Generator, config: ServerConfig) -> Self {
        Self::from_shared(Arc::new(generator), config)
    }

    /// Create application state around an already shared generator.
    pub fn from_shared(generator: SharedGenerator, config: ServerConfig) -> Self {
        let durable = generator.as_durable().is_some();
        Self {
            generator,
            durable,
            queue: AdmissionQueue::new(config.queue.clone()),
            buffer: RunEventBuffer::new(config.buffer.clone()),
            config: Arc::new(config),
        }
    }

    /// Pick the run id for a new generation.
    ///
    /// Returns `None` for non-durable generators. A durable generator may
    /// supply its own id; ids that cannot travel in a header are replaced by
    /// a freshly minted one.
    pub fn allocate_run_id(&self, request: &StreamRequest) -> Option<String> {
        let durable = self.generator.as_durable()?;

        match durable.run_id(request) {
            Some(id) if is_valid_run_id(&id) => Some(id),
            Some(id) => {
                warn!(run_id = %id, "Generator supplied an unusable run id, minting a new one");
                Some(mint_run_id())
            }
            None => Some(mint_run_id()),
        }
    }
}

/// Generate a fresh run id.
pub fn mint_run_id() -> String {
    format!("run_{}", uuid::Uuid::new_v4().simple())
}

/// A run id must be a non-empty header value without whitespace or control
/// characters.
pub fn is_valid_run_id(id: &str) -> bool {
    !id.is_empty()
        && !id.chars().any(|c| c.is_whitespace() || c.is_control())
        && HeaderValue::from_str(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{DurableGenerator, EchoGenerator, UnitStream};
    use tokio_util::sync::CancellationToken;

    struct FixedIdGenerator(&'static str);

    impl Generator for FixedIdGenerator {
        fn generate(&self, _request: StreamRequest, _cancel: CancellationToken) -> UnitStream {
            Box::pin(futures::stream::empty())
        }

        fn as_durable(&self) -> Option<&dyn DurableGenerator> {
            Some(self)
        }
    }

    impl DurableGenerator for FixedIdGenerator {
        fn run_id(&self, _request: &StreamRequest) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn test_minted_ids_are_unique_and_valid() {
        let a = mint_run_id();
        let b = mint_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run_"));
        assert!(is_valid_run_id(&a));
    }

    #[test]
    fn test_run_id_validation() {
        assert!(is_valid_run_id("wf-123"));
        assert!(!is_valid_run_id(""));
        assert!(!is_valid_run_id("has space"));
        assert!(!is_valid_run_id("line\nbreak"));
    }

    #[test]
    fn test_ephemeral_generator_gets_no_run_id() {
        let state = AppState::new(EchoGenerator::new().ephemeral(), ServerConfig::default());
        assert!(!state.durable);
        assert!(state.allocate_run_id(&StreamRequest::new("hi")).is_none());
    }

    #[test]
    fn test_generator_supplied_run_id() {
        let state = AppState::new(FixedIdGenerator("wf_42"), ServerConfig::default());
        assert!(state.durable);
        assert_eq!(
            state.allocate_run_id(&StreamRequest::new("hi")).as_deref(),
            Some("wf_42")
        );

        let state = AppState::new(FixedIdGenerator("bad id"), ServerConfig::default());
        let id = state.allocate_run_id(&StreamRequest::new("hi")).unwrap();
        assert!(id.starts_with("run_"));
    }
}
