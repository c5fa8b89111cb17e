//! HTTP routes.

mod health;
mod queue;
mod replay;
mod stream;

pub use health::{HealthResponse, health, health_routes};
pub use queue::queue_stats_handler;
pub use stream::stream_handler;

use axum::response::sse::Event;

/// Build one SSE frame. The `id:` field is omitted when `id` is `None`.
pub(crate) fn sse_frame(id: Option<&str>, event_type: &str, data: &str) -> Event {
    let event = Event::default().event(event_type).data(data);
    match id {
        Some(id) => event.id(id),
        None => event,
    }
}
