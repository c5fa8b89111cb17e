//! Reconnecting stream client.
//!
//! Each [`ReconnectingStreamClient::stream`] call runs one stream to
//! completion. When the connection drops mid-run it reopens the stream with
//! the run id and the last event id it saw, so the server replays only what
//! was missed. Reconnects back off exponentially and give up after
//! `max_attempts` consecutive failures; any received event resets the count.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_types::{ChatMessage, Role, StreamEvent, StreamRequest, Usage};

use crate::error::{Error, Result};
use crate::transport::{ReceivedEvent, StreamTransport};

/// Default number of consecutive reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first reconnect.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound on the reconnect delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Whether broken streams are resumed at all.
    pub enabled: bool,
    /// Consecutive reconnects allowed before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect; doubles with each attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReconnectConfig {
    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Delay before reconnect number `attempt` (1-based):
/// `min(base * 2^(attempt - 1), max)`.
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    config
        .base_delay
        .saturating_mul(1u32 << exponent)
        .min(config.max_delay)
}

// ─────────────────────────────────────────────────────────────────────────────
// Observer & History
// ─────────────────────────────────────────────────────────────────────────────

/// Where a stream can be resumed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Run id of a durable stream.
    pub run_id: Option<String>,
    /// Id of the last event received.
    pub last_event_id: Option<String>,
}

/// Receives stream progress as it arrives. Every method has a no-op default.
#[allow(unused_variables)]
pub trait StreamObserver: Send {
    fn on_text_delta(&mut self, text: &str) {}

    fn on_tool_call(&mut self, tool_call_id: &str, tool_name: &str, input: &Value) {}

    fn on_tool_result(&mut self, tool_call_id: &str, tool_name: &str, output: &Value, success: bool) {
    }

    fn on_step_start(&mut self, step: u32) {}

    fn on_step_finish(&mut self, step: u32, finish_reason: Option<&str>) {}

    fn on_finish(&mut self, text: &str, usage: Option<&Usage>) {}

    /// Called once when the stream fails for good.
    fn on_error(&mut self, message: &str) {}

    /// Called before waiting to reconnect.
    fn on_reconnect(&mut self, attempt: u32, run_id: &str) {}

    /// Called when a reconnect found `previous` gone and the server started
    /// `run_id` from scratch. Output delivered so far is repeated by the new run.
    fn on_run_restarted(&mut self, previous: &str, run_id: &str) {}
}

/// An observer that ignores everything.
impl StreamObserver for () {}

/// Conversation store a stream records its turn into.
pub trait ConversationHistory: Send + Sync {
    fn append(&self, role: Role, content: &str);
}

/// History kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    messages: Mutex<Vec<ChatMessage>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded messages.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }
}

impl ConversationHistory for InMemoryHistory {
    fn append(&self, role: Role, content: &str) {
        self.messages.lock().push(ChatMessage {
            role,
            content: content.to_string(),
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a completed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    /// All text deltas in order.
    pub text: String,
    /// Run id, for durable streams.
    pub run_id: Option<String>,
    /// Id of the last event received.
    pub last_event_id: Option<String>,
    /// Reconnects it took.
    pub reconnects: u32,
    /// Final text and usage from the `finish` event, if one arrived.
    pub finish: Option<FinishSummary>,
}

/// Contents of a `finish` event.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishSummary {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Progress carried across attempts of one stream.
#[derive(Default)]
struct Progress {
    metadata: StreamMetadata,
    text: String,
    finish: Option<FinishSummary>,
    /// Consecutive failed attempts since the last received event.
    attempt: u32,
    reconnects: u32,
}

/// Runs streams over a transport, resuming them when the connection drops.
pub struct ReconnectingStreamClient<T> {
    transport: T,
    config: ReconnectConfig,
    history: Option<Arc<dyn ConversationHistory>>,
}

impl<T: StreamTransport> ReconnectingStreamClient<T> {
    pub fn new(transport: T, config: ReconnectConfig) -> Self {
        Self {
            transport,
            config,
            history: None,
        }
    }

    /// Record the prompt and the final answer into `history`.
    pub fn with_history(mut self, history: Arc<dyn ConversationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Stream `request` to completion.
    ///
    /// Events are dispatched to `observer` as they arrive. Fails with
    /// [`Error::Cancelled`] once `cancel` fires, with [`Error::Generation`]
    /// if the server reports a failed run, and with the last transport error
    /// once reconnects are exhausted or not possible.
    pub async fn stream(
        &self,
        request: &StreamRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        if let (Some(history), Some(input)) = (&self.history, request.input_text()) {
            history.append(Role::User, input);
        }

        let mut progress = Progress::default();

        loop {
            let err = match self.attempt(request, observer, cancel, &mut progress).await {
                Ok(()) => return Ok(self.complete(progress)),
                Err(err) => err,
            };

            let Some(run_id) = self.resumable_run(&err, &progress, cancel) else {
                // Generation failures were already reported with the event.
                if !matches!(err, Error::Generation(_) | Error::Cancelled) {
                    observer.on_error(&err.to_string());
                }
                return Err(err);
            };

            progress.attempt += 1;
            progress.reconnects += 1;
            let delay = backoff_delay(&self.config, progress.attempt);
            warn!(
                run_id = %run_id,
                attempt = progress.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Stream interrupted, reconnecting"
            );
            observer.on_reconnect(progress.attempt, &run_id);

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// The run to resume after `err`, if every reconnect condition holds.
    fn resumable_run(
        &self,
        err: &Error,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let run_id = progress.metadata.run_id.clone()?;
        let allowed = self.config.enabled
            && progress.attempt < self.config.max_attempts
            && !cancel.is_cancelled()
            && err.is_retryable_transport();
        allowed.then_some(run_id)
    }

    /// One attempt: open the transport and consume it until a terminal event.
    async fn attempt(
        &self,
        request: &StreamRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let opened = self
            .transport
            .open(request, &progress.metadata, cancel)
            .await?;
        if let Some(run_id) = opened.run_id {
            let previous = progress.metadata.run_id.replace(run_id.clone());
            if let Some(previous) = previous.filter(|previous| *previous != run_id) {
                // The old run expired on the server and a fresh generation
                // started; what was collected from the old run is stale.
                warn!(previous = %previous, run_id = %run_id, "Run no longer buffered, restarting stream");
                observer.on_run_restarted(&previous, &run_id);
                progress.text.clear();
                progress.finish = None;
                progress.metadata.last_event_id = None;
            }
        }

        let mut events = opened.events;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = events.next() => next,
            };

            let received = match next {
                Some(Ok(received)) => received,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(Error::Transport(
                        "stream ended before completion".to_string(),
                    ));
                }
            };

            progress.attempt = 0;
            if is_replayed(&progress.metadata, &received) {
                debug!(id = ?received.id, "Skipping already delivered event");
                continue;
            }
            if let Some(id) = &received.id {
                progress.metadata.last_event_id = Some(id.clone());
            }

            if dispatch(received.event, observer, progress)? {
                return Ok(());
            }
        }
    }

    fn complete(&self, progress: Progress) -> StreamOutcome {
        let text = match (&progress.finish, progress.text.is_empty()) {
            (Some(finish), true) => finish.text.clone(),
            _ => progress.text,
        };

        if let Some(history) = &self.history {
            history.append(Role::Assistant, &text);
        }
        info!(
            run_id = ?progress.metadata.run_id,
            reconnects = progress.reconnects,
            "Stream completed"
        );

        StreamOutcome {
            text,
            run_id: progress.metadata.run_id,
            last_event_id: progress.metadata.last_event_id,
            reconnects: progress.reconnects,
            finish: progress.finish,
        }
    }
}

/// Hand one event to the observer. Returns `Ok(true)` on `done`.
fn dispatch(
    event: StreamEvent,
    observer: &mut dyn StreamObserver,
    progress: &mut Progress,
) -> Result<bool> {
    match event {
        StreamEvent::TextDelta { text } => {
            observer.on_text_delta(&text);
            progress.text.push_str(&text);
        }
        StreamEvent::ToolCall {
            tool_call_id,
            tool_name,
            input,
        } => observer.on_tool_call(&tool_call_id, &tool_name, &input),
        StreamEvent::ToolResult {
            tool_call_id,
            tool_name,
            output,
            success,
        } => observer.on_tool_result(&tool_call_id, &tool_name, &output, success),
        StreamEvent::StepStart { step } => observer.on_step_start(step),
        StreamEvent::StepFinish {
            step,
            finish_reason,
        } => observer.on_step_finish(step, finish_reason.as_deref()),
        StreamEvent::Finish { text, usage } => {
            observer.on_finish(&text, usage.as_ref());
            progress.finish = Some(FinishSummary { text, usage });
        }
        StreamEvent::Done => return Ok(true),
        StreamEvent::Error { error } => {
            observer.on_error(&error);
            return Err(Error::Generation(error));
        }
    }
    Ok(false)
}

/// Whether `received` was already delivered in an earlier attempt. Happens
/// when the server no longer holds the last seen id and replays its whole
/// window.
fn is_replayed(metadata: &StreamMetadata, received: &ReceivedEvent) -> bool {
    let (Some(last), Some(id)) = (&metadata.last_event_id, &received.id) else {
        return false;
    };
    match (sequence_of(last), sequence_of(id)) {
        (Some((last_run, last_seq)), Some((run, seq))) => run == last_run && seq <= last_seq,
        _ => false,
    }
}

/// Split `{run_id}:{n}` into its parts.
fn sequence_of(event_id: &str) -> Option<(&str, u64)> {
    let (run, sequence) = event_id.rsplit_once(':')?;
    Some((run, sequence.parse().ok()?))
}
