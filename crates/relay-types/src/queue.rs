//! Admission queue statistics as served by `GET /queue`.

use serde::{Deserialize, Serialize};

/// Snapshot of admission queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Generations currently holding a slot.
    pub active: usize,
    /// Callers waiting for a slot.
    pub queued: usize,
    /// Configured concurrency limit.
    pub max_concurrent: usize,
    /// Configured waiting-list limit.
    pub max_queue_size: usize,
    /// Free slots, never negative.
    pub available: usize,
}
