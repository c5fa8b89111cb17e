//! Wire types shared by the relay server and client.
//!
//! Everything that crosses the HTTP boundary lives here: the SSE event
//! vocabulary, the stream request body, queue statistics, and the header
//! names used to resume a run.

pub mod event;
pub mod headers;
pub mod message;
pub mod queue;

pub use event::{FrameError, StreamEvent, StreamUnit, Usage, event_type};
pub use headers::{LAST_EVENT_ID_HEADER, RUN_ID_HEADER};
pub use message::{ChatMessage, Role, StreamRequest};
pub use queue::QueueStats;
