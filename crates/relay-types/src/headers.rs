//! Header names used by the resumable stream protocol.

/// Run id of a durable stream. Sent by the server on every durable response
/// and by the client when it wants to resume that run.
pub const RUN_ID_HEADER: &str = "x-workflow-run-id";

/// Standard SSE resume header carrying the id of the last processed event.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
