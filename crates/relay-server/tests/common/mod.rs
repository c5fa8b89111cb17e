//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use relay_server::{
    AdmissionQueue, AppState, DurableGenerator, Generator, Server, ServerConfig, UnitStream,
};
use relay_types::{LAST_EVENT_ID_HEADER, RUN_ID_HEADER, StreamRequest, StreamUnit};

/// Streams a fixed list of text chunks with a pause before each one.
#[derive(Clone)]
pub struct ScriptedGenerator {
    chunks: Vec<String>,
    delay: Duration,
    durable: bool,
    stopped_early: Arc<AtomicBool>,
}

/// Flags a generation whose stream was dropped before the last chunk.
struct EarlyStop {
    flag: Arc<AtomicBool>,
    finished: bool,
}

impl Drop for EarlyStop {
    fn drop(&mut self) {
        if !self.finished {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

impl ScriptedGenerator {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: Duration::from_millis(50),
            durable: true,
            stopped_early: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Five chunks `chunk-1` .. `chunk-5`.
    pub fn five_chunks() -> Self {
        Self::new((1..=5).map(|n| format!("chunk-{n}")))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.durable = false;
        self
    }

    /// Whether a generation was cancelled or dropped before it finished.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early.load(Ordering::SeqCst)
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, _request: StreamRequest, cancel: CancellationToken) -> UnitStream {
        let chunks = self.chunks.clone();
        let delay = self.delay;
        let flag = Arc::clone(&self.stopped_early);

        Box::pin(async_stream::stream! {
            let mut guard = EarlyStop { flag, finished: false };
            for chunk in chunks {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                yield Ok(StreamUnit::text(chunk));
            }
            guard.finished = true;
        })
    }

    fn as_durable(&self) -> Option<&dyn DurableGenerator> {
        self.durable.then_some(self as &dyn DurableGenerator)
    }
}

impl DurableGenerator for ScriptedGenerator {}

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    state: AppState,
    shutdown: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server around `generator` with default configuration.
    pub async fn start(generator: impl Generator) -> Result<Self> {
        Self::start_with_config(generator, ServerConfig::new().with_request_logging(false)).await
    }

    /// Start a server with a custom configuration. The bind address is
    /// replaced by a free local port.
    pub async fn start_with_config(generator: impl Generator, config: ServerConfig) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = Server::new(generator, config.with_bind_address(addr));
        let state = server.state().clone();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = server
                .serve(listener, async move { token.cancelled().await })
                .await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            state,
            shutdown,
            _handle: handle,
        })
    }

    /// The server's admission queue.
    pub fn queue(&self) -> &AdmissionQueue {
        &self.state.queue
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A `POST /stream` request, optionally resuming a run.
    pub fn stream(
        &self,
        prompt: &str,
        run_id: Option<&str>,
        last_event_id: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}/stream", self.base_url()))
            .json(&StreamRequest::new(prompt));
        if let Some(run_id) = run_id {
            request = request.header(RUN_ID_HEADER, run_id);
        }
        if let Some(last_event_id) = last_event_id {
            request = request.header(LAST_EVENT_ID_HEADER, last_event_id);
        }
        request
    }

    /// Check if server is healthy.
    pub async fn health(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url()))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
