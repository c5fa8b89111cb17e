//! Admission-controlled, resumable SSE streaming server.
//!
//! This crate puts a [`Generator`] behind `POST /stream` and makes its
//! output survive dropped connections.
//!
//! # Features
//!
//! - FIFO admission queue bounding concurrent generations
//! - Per-run event buffering with sequential event ids
//! - Replay of a durable run by `x-workflow-run-id` and `Last-Event-ID`
//! - Background expiry of idle runs
//! - Request logging
//!
//! # Example
//!
//! ```ignore
//! use relay_server::{EchoGenerator, Server, ServerConfig};
//!
//! let config = ServerConfig::new().with_bind_address("127.0.0.1:8080".parse()?);
//! let server = Server::new(EchoGenerator::new(), config);
//! server.run().await?;
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod routes;
pub mod state;

pub use admission::{AdmissionPermit, AdmissionQueue, QueueConfig, QueueError};
pub use config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use generator::{
    DurableGenerator, EchoGenerator, GenerationError, Generator, SharedGenerator, UnitStream,
};
pub use logging::request_logging_middleware;
pub use state::AppState;

pub use relay_buffer::{BufferConfig, RunEventBuffer};

use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, middleware};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The relay HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server with the given generator and configuration.
    pub fn new(generator: impl Generator, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(generator, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Shared application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::{get, post};

        Router::new()
            .merge(routes::health_routes())
            .route("/stream", post(routes::stream_handler))
            .route("/queue", get(routes::queue_stats_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                logging::request_logging_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server until the process is stopped.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// In-flight responses are allowed to finish. Afterwards every caller
    /// still waiting for a slot is failed and the buffer sweeper stops.
    pub async fn run_until<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let sweeper = CancellationToken::new();
        let cleanup = self
            .state
            .buffer
            .config()
            .enable_cleanup_task
            .then(|| self.state.buffer.spawn_cleanup_task(sweeper.clone()));

        if let Ok(addr) = listener.local_addr() {
            info!("Starting server on {}", addr);
        }

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)));

        let drained = self.state.queue.drain();
        sweeper.cancel();
        if let Some(cleanup) = cleanup
            && let Err(e) = cleanup.await
        {
            warn!(error = %e, "Buffer cleanup task failed");
        }
        info!(drained, "Server stopped");

        served
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
