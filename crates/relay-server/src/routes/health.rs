//! Liveness check with a summary of what the server is holding.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the server answers.
    pub status: String,
    pub version: String,
    /// Whether runs are buffered for resumption.
    pub durable: bool,
    /// Runs currently held in the event buffer.
    pub buffered_runs: usize,
    /// Generations holding an admission slot.
    pub generating: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        durable: state.durable,
        buffered_runs: state.buffer.stats().active_runs,
        generating: state.queue.stats().active,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::{EchoGenerator, ServerConfig};

    async fn check(state: AppState) -> HealthResponse {
        let app = health_routes().with_state(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_buffer_and_slots() {
        let state = AppState::new(EchoGenerator::new(), ServerConfig::new());
        state.buffer.store("run_a", "text-delta", r#"{"text":"x"}"#);
        let _slot = state.queue.acquire().await.unwrap();

        let health = check(state).await;
        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
        assert!(health.durable);
        assert_eq!(health.buffered_runs, 1);
        assert_eq!(health.generating, 1);
    }

    #[tokio::test]
    async fn test_health_for_ephemeral_generator() {
        let state = AppState::new(EchoGenerator::new().ephemeral(), ServerConfig::new());
        let health = check(state).await;
        assert!(!health.durable);
        assert_eq!(health.buffered_runs, 0);
    }
}
