//! Admission queue statistics.

use axum::{Json, extract::State};
use relay_types::QueueStats;

use crate::state::AppState;

/// GET /queue - current admission queue occupancy.
pub async fn queue_stats_handler(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}
