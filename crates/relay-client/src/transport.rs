//! Stream transports.
//!
//! A transport opens one attempt at a stream and yields decoded events. The
//! reconnect logic in [`crate::reconnect`] sits on top and never touches
//! HTTP directly, which lets tests drive it with scripted transports.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use relay_types::{RUN_ID_HEADER, StreamEvent, StreamRequest};

use crate::client::RelayClient;
use crate::error::{Error, Result};
use crate::reconnect::StreamMetadata;

/// One event read from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    /// The `id:` of the frame; `None` for non-durable runs.
    pub id: Option<String>,
    /// The decoded event.
    pub event: StreamEvent,
}

impl ReceivedEvent {
    pub fn new(id: Option<String>, event: StreamEvent) -> Self {
        Self { id, event }
    }
}

/// An opened stream attempt.
pub struct TransportStream {
    /// Run id reported by the server, present for durable runs.
    pub run_id: Option<String>,
    /// Events in arrival order. The stream ends when the connection closes.
    pub events: BoxStream<'static, Result<ReceivedEvent>>,
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStream")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// Opens stream attempts.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a stream for `request`. When `resume` names a run, the server
    /// is asked to replay it from `resume.last_event_id` instead of
    /// generating again.
    async fn open(
        &self,
        request: &StreamRequest,
        resume: &StreamMetadata,
        cancel: &CancellationToken,
    ) -> Result<TransportStream>;
}

/// SSE over HTTP against a relay server.
#[derive(Clone)]
pub struct HttpTransport {
    client: RelayClient,
}

impl HttpTransport {
    pub fn new(client: RelayClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(
        &self,
        request: &StreamRequest,
        resume: &StreamMetadata,
        cancel: &CancellationToken,
    ) -> Result<TransportStream> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.post_stream(request, resume) => response?,
        };

        let run_id = response
            .headers()
            .get(RUN_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|frame| -> Result<ReceivedEvent> {
                let frame = frame.map_err(|e| Error::Transport(e.to_string()))?;
                trace!(event = %frame.event, id = %frame.id, "Received frame");
                let event = StreamEvent::from_frame(&frame.event, &frame.data)?;
                let id = (!frame.id.is_empty()).then_some(frame.id);
                Ok(ReceivedEvent { id, event })
            })
            .boxed();

        Ok(TransportStream { run_id, events })
    }
}
