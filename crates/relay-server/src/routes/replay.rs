//! Replay of a buffered run.
//!
//! Sends the buffered events after the client's last seen id, then keeps
//! following the run while it is still generating. The response ends on a
//! terminal event, when the run is dropped from the buffer, or after the
//! follow timeout passes without new events. A completed run whose terminal
//! event is not part of the replay gets an id-less `done` appended.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures::Stream;
use relay_buffer::{BufferedEvent, RunEventBuffer, parse_event_id};
use relay_types::{StreamEvent, event_type};
use tokio::sync::Notify;
use tracing::debug;

use super::sse_frame;

fn is_terminal(event: &BufferedEvent) -> bool {
    event.event_type == event_type::DONE || event.event_type == event_type::ERROR
}

/// SSE frames replaying `run_id` from `last_event_id` onwards.
pub(super) fn replay_frames(
    buffer: RunEventBuffer,
    run_id: String,
    last_event_id: Option<String>,
    notify: Arc<Notify>,
    follow_timeout: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut next_sequence: Option<u64> = None;

        loop {
            // Register for wakeups before reading so a store that lands in
            // between is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let completed = buffer.is_completed(&run_id);
            let batch = match (next_sequence, last_event_id.as_deref()) {
                (Some(sequence), _) => buffer.events_since(&run_id, sequence),
                (None, Some(last)) => buffer.get_events_after(&run_id, last),
                (None, None) => buffer.get_all_events(&run_id),
            };

            if next_sequence.is_none() {
                debug!(run_id = %run_id, events = batch.len(), completed, "Replaying buffered events");
            }

            let mut saw_terminal = false;
            for event in &batch {
                saw_terminal |= is_terminal(event);
                yield Ok(sse_frame(Some(&event.id), &event.event_type, &event.payload));
            }
            if saw_terminal {
                return;
            }

            next_sequence = match batch.last() {
                Some(last) => Some(last.sequence + 1),
                None => next_sequence.or_else(|| {
                    last_event_id
                        .as_deref()
                        .and_then(|id| parse_event_id(id).ok())
                        .map(|(_, sequence)| sequence + 1)
                        .or(Some(0))
                }),
            };

            if completed {
                let done = StreamEvent::Done;
                let data = done.to_data().unwrap_or_else(|_| "{}".to_string());
                yield Ok(sse_frame(None, done.event_type(), &data));
                return;
            }

            if !buffer.has(&run_id) {
                debug!(run_id = %run_id, "Run left the buffer during replay");
                return;
            }

            if tokio::time::timeout(follow_timeout, notified).await.is_err() {
                debug!(run_id = %run_id, "No new events, ending replay");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use relay_buffer::BufferConfig;

    fn buffer() -> RunEventBuffer {
        RunEventBuffer::new(BufferConfig::default())
    }

    async fn frame_count(
        buffer: &RunEventBuffer,
        last_event_id: Option<&str>,
        follow: Duration,
    ) -> usize {
        let notify = buffer.subscribe("run").unwrap();
        replay_frames(
            buffer.clone(),
            "run".to_string(),
            last_event_id.map(str::to_string),
            notify,
            follow,
        )
        .count()
        .await
    }

    #[tokio::test]
    async fn test_completed_run_ends_after_terminal() {
        let buffer = buffer();
        buffer.store("run", "text-delta", r#"{"text":"a"}"#);
        buffer.store("run", "done", "{}");
        buffer.mark_completed("run");

        assert_eq!(frame_count(&buffer, None, Duration::from_secs(30)).await, 2);
    }

    #[tokio::test]
    async fn test_completed_run_without_terminal_in_window_gets_done() {
        let buffer = buffer();
        buffer.store("run", "text-delta", r#"{"text":"a"}"#);
        let last = buffer.store("run", "text-delta", r#"{"text":"b"}"#);
        buffer.mark_completed("run");

        assert_eq!(
            frame_count(&buffer, Some(&last), Duration::from_secs(30)).await,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_live_run_times_out() {
        let buffer = buffer();
        let first = buffer.store("run", "text-delta", r#"{"text":"a"}"#);
        buffer.store("run", "text-delta", r#"{"text":"b"}"#);

        assert_eq!(
            frame_count(&buffer, Some(&first), Duration::from_secs(5)).await,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_live_run_until_done() {
        let buffer = buffer();
        buffer.store("run", "text-delta", r#"{"text":"a"}"#);

        let writer = buffer.clone();
        tokio::spawn(async move {
            for text in ["b", "c"] {
                tokio::time::sleep(Duration::from_millis(100)).await;
                writer.store("run", "text-delta", format!(r#"{{"text":"{text}"}}"#));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.store("run", "done", "{}");
            writer.mark_completed("run");
        });

        // a, b, c, done
        assert_eq!(frame_count(&buffer, None, Duration::from_secs(30)).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_run_ends_replay() {
        let buffer = buffer();
        buffer.store("run", "text-delta", r#"{"text":"a"}"#);

        let remover = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            remover.remove("run");
        });

        assert_eq!(frame_count(&buffer, None, Duration::from_secs(30)).await, 1);
    }
}
