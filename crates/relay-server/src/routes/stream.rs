//! `POST /stream`: start a generation or resume a buffered run.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use relay_buffer::RunEventBuffer;
use relay_types::{LAST_EVENT_ID_HEADER, RUN_ID_HEADER, StreamEvent, StreamRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{replay, sse_frame};
use crate::admission::AdmissionPermit;
use crate::error::{Result, ServerError};
use crate::generator::UnitStream;
use crate::state::AppState;

/// Frames buffered between the generation task and a live response.
const LIVE_CHANNEL_CAPACITY: usize = 64;

/// Message recorded when a generation task ends without a terminal event.
const ABORTED_MESSAGE: &str = "generation aborted";

/// Stream handler.
///
/// A request whose `x-workflow-run-id` names a buffered run is served from
/// the buffer without touching the admission queue. Anything else starts a
/// new generation.
pub async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let requested_run = header_str(&headers, RUN_ID_HEADER);
    let last_event_id = header_str(&headers, LAST_EVENT_ID_HEADER).filter(|id| !id.is_empty());

    if let Some(run_id) = requested_run {
        if let Some(notify) = state.buffer.subscribe(run_id) {
            info!(run_id = %run_id, last_event_id = ?last_event_id, "Resuming buffered run");
            let frames = replay::replay_frames(
                state.buffer.clone(),
                run_id.to_string(),
                last_event_id.map(str::to_string),
                notify,
                state.config.replay_follow_timeout,
            );
            return sse_response(&state, frames, Some(run_id));
        }
        warn!(run_id = %run_id, "Unknown run id, starting a new run");
    }

    let request = parse_request(&body)?;
    let run_id = state.allocate_run_id(&request);
    let permit = state.queue.acquire().await?;

    let cancel = CancellationToken::new();
    let units = state.generator.generate(request, cancel.child_token());
    let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);

    debug!(run_id = ?run_id, "Starting generation");
    let driver = RunDriver {
        buffer: state.buffer.clone(),
        run_id: run_id.clone(),
        _permit: permit,
        live: Some(tx),
    };
    tokio::spawn(driver.drive(units, cancel.clone()));

    // A durable run outlives its response; an ephemeral one is cancelled
    // as soon as nobody is listening.
    let guard = run_id.is_none().then(|| cancel.drop_guard());
    let frames = async_stream::stream! {
        let _guard = guard;
        let mut rx = rx;
        while let Some(frame) = rx.recv().await {
            yield Ok::<_, Infallible>(frame);
        }
    };

    sse_response(&state, frames, run_id.as_deref())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_request(body: &Bytes) -> Result<StreamRequest> {
    let request: StreamRequest = serde_json::from_slice(body)
        .map_err(|e| ServerError::BadRequest(format!("Invalid request body: {e}")))?;

    if !request.has_input() {
        return Err(ServerError::BadRequest(
            "Request must include a prompt or messages".to_string(),
        ));
    }
    Ok(request)
}

/// Wrap frames into an SSE response, adding the run id header when there
/// is one.
pub(super) fn sse_response<S>(state: &AppState, frames: S, run_id: Option<&str>) -> Result<Response>
where
    S: Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static,
{
    let mut response = if state.config.keep_alive {
        Sse::new(frames)
            .keep_alive(KeepAlive::default())
            .into_response()
    } else {
        Sse::new(frames).into_response()
    };

    if let Some(run_id) = run_id {
        let value = HeaderValue::from_str(run_id)
            .map_err(|e| ServerError::Internal(format!("Invalid run id header: {e}")))?;
        response
            .headers_mut()
            .insert(HeaderName::from_static(RUN_ID_HEADER), value);
    }
    Ok(response)
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation task
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one generation: buffers each event, then forwards it to the live
/// response. Holds the admission permit for as long as it runs.
struct RunDriver {
    buffer: RunEventBuffer,
    run_id: Option<String>,
    _permit: AdmissionPermit,
    live: Option<mpsc::Sender<Event>>,
}

impl RunDriver {
    async fn drive(mut self, mut units: UnitStream, cancel: CancellationToken) {
        let mut recorder = RunRecorder {
            buffer: self.buffer.clone(),
            run_id: self.run_id.clone(),
            finished: false,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(run_id = ?self.run_id, "Generation cancelled");
                    return;
                }
                next = units.next() => next,
            };

            match next {
                Some(Ok(unit)) => {
                    if !self.emit(&StreamEvent::from(unit)).await {
                        debug!("Client disconnected, stopping ephemeral generation");
                        cancel.cancel();
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!(run_id = ?self.run_id, error = %e, "Generation failed");
                    self.emit(&StreamEvent::error(e.message())).await;
                    recorder.finish();
                    return;
                }
                None => {
                    self.emit(&StreamEvent::Done).await;
                    recorder.finish();
                    info!(run_id = ?self.run_id, "Generation completed");
                    return;
                }
            }
        }
    }

    /// Store the event (durable runs) and forward it with the same id.
    ///
    /// Returns `false` when an ephemeral run lost its listener.
    async fn emit(&mut self, event: &StreamEvent) -> bool {
        let (event_type, data) = match event.to_data() {
            Ok(data) => (event.event_type(), data),
            Err(e) => {
                warn!(error = %e, "Failed to serialize stream event");
                let fallback = StreamEvent::error(format!("Failed to serialize event: {e}"));
                let data = fallback
                    .to_data()
                    .unwrap_or_else(|_| r#"{"error":"serialization failed"}"#.to_string());
                (fallback.event_type(), data)
            }
        };

        let id = self
            .run_id
            .as_deref()
            .map(|run_id| self.buffer.store(run_id, event_type, data.clone()));

        let Some(live) = &self.live else {
            return self.run_id.is_some();
        };
        if live
            .send(sse_frame(id.as_deref(), event_type, &data))
            .await
            .is_err()
        {
            self.live = None;
            return self.run_id.is_some();
        }
        true
    }
}

/// Marks a durable run terminal on every exit path. If the task ends before
/// a terminal event was recorded, an error event is stored first.
struct RunRecorder {
    buffer: RunEventBuffer,
    run_id: Option<String>,
    finished: bool,
}

impl RunRecorder {
    fn finish(&mut self) {
        self.finished = true;
        if let Some(run_id) = &self.run_id {
            self.buffer.mark_completed(run_id);
        }
    }
}

impl Drop for RunRecorder {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(run_id) = &self.run_id {
            warn!(run_id = %run_id, "Run ended without a terminal event");
            let event = StreamEvent::error(ABORTED_MESSAGE);
            if let Ok(data) = event.to_data() {
                self.buffer.store(run_id, event.event_type(), data);
            }
            self.buffer.mark_completed(run_id);
        }
    }
}
