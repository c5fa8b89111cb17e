//! Request logging middleware.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use relay_types::RUN_ID_HEADER;

use crate::state::AppState;

/// Log one line per request with its run and the queue occupancy.
///
/// Streams are logged when their response starts, so `duration_ms` covers
/// admission and not the whole stream. `resumed` marks requests that were
/// answered from the buffer under the run id they asked for.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let requested_run = run_id(request.headers()).map(str::to_string);
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;
    let run_id = run_id(response.headers()).unwrap_or("-").to_string();
    let resumed = requested_run.as_deref() == Some(run_id.as_str());
    let queue = state.queue.stats();

    macro_rules! log_request {
        ($level:ident, $message:literal) => {
            tracing::$level!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms,
                run_id = %run_id,
                resumed,
                active = queue.active,
                queued = queue.queued,
                $message
            )
        };
    }

    match Class::of(status) {
        Class::ServerError => log_request!(error, "Request failed"),
        Class::ClientError => log_request!(warn, "Request rejected"),
        Class::Success => log_request!(info, "Request served"),
    }

    response
}

fn run_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(RUN_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, PartialEq, Eq)]
enum Class {
    Success,
    ClientError,
    ServerError,
}

impl Class {
    fn of(status: StatusCode) -> Self {
        if status.is_server_error() {
            Class::ServerError
        } else if status.is_client_error() {
            Class::ClientError
        } else {
            Class::Success
        }
    }
}
