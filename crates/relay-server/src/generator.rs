//! The generation seam.
//!
//! A [`Generator`] turns a [`StreamRequest`] into a stream of
//! [`StreamUnit`]s. The model call and tool loop live behind it; the server
//! only drives the stream. Generators that can be resumed expose the
//! [`DurableGenerator`] capability, which the server checks once when the
//! application state is built.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use relay_types::{StreamRequest, StreamUnit, Usage};

/// A boxed stream of generated units.
pub type UnitStream =
    Pin<Box<dyn Stream<Item = Result<StreamUnit, GenerationError>> + Send + 'static>>;

/// Shared generator handle.
pub type SharedGenerator = Arc<dyn Generator>;

/// A generation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GenerationError {
    message: String,
}

impl GenerationError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message sent to clients.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Produces the output of one stream request.
pub trait Generator: Send + Sync + 'static {
    /// Start generating. The stream ends after the final unit; an `Err` item
    /// ends the generation with a failure. Implementations should stop
    /// promptly once `cancel` fires.
    fn generate(&self, request: StreamRequest, cancel: CancellationToken) -> UnitStream;

    /// Resumability capability. Durable generators return themselves.
    fn as_durable(&self) -> Option<&dyn DurableGenerator> {
        None
    }
}

/// A generator whose runs can be buffered and resumed by run id.
pub trait DurableGenerator: Generator {
    /// The run id this generator already assigned to `request`, if any.
    /// When `None` the server mints one.
    fn run_id(&self, _request: &StreamRequest) -> Option<String> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Echo Generator
// ─────────────────────────────────────────────────────────────────────────────

/// Streams the request's input back word by word.
///
/// Used by `relay start` when no model is wired in, and as a deterministic
/// generator in tests. Emits one step with a text delta per word followed by
/// a `finish` unit carrying the whole text.
#[derive(Debug, Clone)]
pub struct EchoGenerator {
    word_delay: Duration,
    durable: bool,
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoGenerator {
    /// A durable echo generator with no delay between words.
    pub fn new() -> Self {
        Self {
            word_delay: Duration::ZERO,
            durable: true,
        }
    }

    /// Pause between words.
    pub fn with_word_delay(mut self, delay: Duration) -> Self {
        self.word_delay = delay;
        self
    }

    /// Make runs non-resumable.
    pub fn ephemeral(mut self) -> Self {
        self.durable = false;
        self
    }
}

impl Generator for EchoGenerator {
    fn generate(&self, request: StreamRequest, cancel: CancellationToken) -> UnitStream {
        let text = request.input_text().unwrap_or_default().to_string();
        let delay = self.word_delay;

        Box::pin(async_stream::stream! {
            yield Ok(StreamUnit::StepStart { step: 1 });

            let words: Vec<&str> = text.split_whitespace().collect();
            let mut emitted = String::new();
            for (index, word) in words.iter().enumerate() {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let delta = if index + 1 < words.len() {
                    format!("{word} ")
                } else {
                    word.to_string()
                };
                emitted.push_str(&delta);
                yield Ok(StreamUnit::text(delta));
            }

            yield Ok(StreamUnit::StepFinish {
                step: 1,
                finish_reason: Some("stop".to_string()),
            });
            let usage = Usage {
                input_tokens: words.len() as u32,
                output_tokens: words.len() as u32,
            };
            yield Ok(StreamUnit::Finish {
                text: emitted,
                usage: Some(usage),
            });
        })
    }

    fn as_durable(&self) -> Option<&dyn DurableGenerator> {
        self.durable.then_some(self as &dyn DurableGenerator)
    }
}

impl DurableGenerator for EchoGenerator {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_echo_streams_words() {
        let generator = EchoGenerator::new();
        let units: Vec<_> = generator
            .generate(StreamRequest::new("hello brave world"), CancellationToken::new())
            .collect()
            .await;

        let units: Vec<StreamUnit> = units.into_iter().map(|u| u.unwrap()).collect();
        assert_eq!(units.len(), 6);
        assert_eq!(units[0], StreamUnit::StepStart { step: 1 });
        assert_eq!(units[1], StreamUnit::text("hello "));
        assert_eq!(units[3], StreamUnit::text("world"));
        match &units[5] {
            StreamUnit::Finish { text, .. } => assert_eq!(text, "hello brave world"),
            other => panic!("unexpected unit: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_stops_on_cancel() {
        let generator = EchoGenerator::new().with_word_delay(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut stream = generator.generate(StreamRequest::new("a b c"), cancel.clone());

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamUnit::StepStart { step: 1 }
        );
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_durability_is_a_construction_choice() {
        assert!(EchoGenerator::new().as_durable().is_some());
        assert!(EchoGenerator::new().ephemeral().as_durable().is_none());
    }
}
