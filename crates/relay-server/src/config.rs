//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use relay_buffer::BufferConfig;

use crate::admission::QueueConfig;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

/// Default time a replay of an unfinished run waits for new events before
/// ending the response (30 seconds).
pub const DEFAULT_REPLAY_FOLLOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Enable request logging.
    pub request_logging: bool,

    /// Send SSE keep-alive comments on idle streams.
    pub keep_alive: bool,

    /// Admission queue limits.
    pub queue: QueueConfig,

    /// Run event buffer settings.
    pub buffer: BufferConfig,

    /// How long a replay of a still-running run waits for the next event.
    /// When it elapses the response ends without a terminal event and the
    /// client is expected to reconnect.
    pub replay_follow_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            request_logging: true,
            keep_alive: true,
            queue: QueueConfig::default(),
            buffer: BufferConfig::default(),
            replay_follow_timeout: DEFAULT_REPLAY_FOLLOW_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    /// Enable or disable SSE keep-alive comments.
    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Set the admission queue limits.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the run event buffer settings.
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the replay follow timeout.
    pub fn with_replay_follow_timeout(mut self, timeout: Duration) -> Self {
        self.replay_follow_timeout = timeout;
        self
    }
}
