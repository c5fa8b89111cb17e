//! Configuration types.
//!
//! Every section and field is optional in the file; missing values take the
//! defaults of the runtime types they convert into.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use relay_buffer::BufferConfig;
use relay_client::ReconnectConfig;
use relay_server::{QueueConfig, ServerConfig};

use crate::{ConfigError, Result};

/// Upper bound for `client.reconnect.max_attempts`.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 20;

/// Default port for `relay start`.
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind address for `relay start`.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default server URL for client commands.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

// ─────────────────────────────────────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// HTTP server settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSection>,

    /// Admission queue limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueSection>,

    /// Run event buffer settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer: Option<BufferSection>,

    /// Client settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSection>,
}

impl RelayConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole: a section present in `other` wins over
    /// this one's, field defaults included.
    pub fn merge(&mut self, other: RelayConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.queue.is_some() {
            self.queue = other.queue;
        }
        if other.buffer.is_some() {
            self.buffer = other.buffer;
        }
        if other.client.is_some() {
            self.client = other.client;
        }
    }

    /// Copy with every missing section filled with its defaults.
    pub fn resolved(&self) -> RelayConfig {
        RelayConfig {
            server: Some(self.server.clone().unwrap_or_default()),
            queue: Some(self.queue.clone().unwrap_or_default()),
            buffer: Some(self.buffer.clone().unwrap_or_default()),
            client: Some(self.client.clone().unwrap_or_default()),
        }
    }

    /// Check values that would make the system unusable.
    pub fn validate(&self) -> Result<()> {
        let queue = self.queue.clone().unwrap_or_default();
        if queue.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_concurrent must be at least 1".to_string(),
            ));
        }

        let buffer = self.buffer.clone().unwrap_or_default();
        if buffer.max_events_per_run == 0 {
            return Err(ConfigError::Invalid(
                "buffer.max_events_per_run must be at least 1".to_string(),
            ));
        }
        if buffer.ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "buffer.ttl_secs must be at least 1".to_string(),
            ));
        }
        if buffer.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "buffer.cleanup_interval_secs must be at least 1".to_string(),
            ));
        }

        let reconnect = self.reconnect();
        if reconnect.max_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "client.reconnect.max_attempts must be at most {MAX_RECONNECT_ATTEMPTS}"
            )));
        }
        if reconnect.base_delay_ms > reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(
                "client.reconnect.base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        self.server.clone().unwrap_or_default().socket_addr()?;
        Ok(())
    }

    /// Runtime server configuration from the `[server]`, `[queue]` and
    /// `[buffer]` sections.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let server = self.server.clone().unwrap_or_default();
        Ok(ServerConfig::new()
            .with_bind_address(server.socket_addr()?)
            .with_request_logging(server.request_logging)
            .with_keep_alive(server.keep_alive)
            .with_replay_follow_timeout(Duration::from_secs(server.replay_follow_timeout_secs))
            .with_queue(self.queue.clone().unwrap_or_default().to_queue_config())
            .with_buffer(self.buffer.clone().unwrap_or_default().to_buffer_config()))
    }

    /// Runtime reconnect policy from `[client.reconnect]`.
    pub fn reconnect_config(&self) -> ReconnectConfig {
        self.reconnect().to_reconnect_config()
    }

    /// Server URL for client commands.
    pub fn server_url(&self) -> String {
        self.client
            .as_ref()
            .map(|c| c.server_url.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    }

    fn reconnect(&self) -> ReconnectSection {
        self.client
            .as_ref()
            .map(|c| c.reconnect.clone())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Port to listen on.
    pub port: u16,
    /// Address to bind to.
    pub bind: String,
    /// Enable request logging.
    pub request_logging: bool,
    /// Send SSE keep-alive comments.
    pub keep_alive: bool,
    /// Seconds a replay waits for new events of an unfinished run.
    pub replay_follow_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            request_logging: true,
            keep_alive: true,
            replay_follow_timeout_secs: 30,
        }
    }
}

impl ServerSection {
    /// The address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address '{}'", self.bind)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Generations allowed to run at once.
    pub max_concurrent: usize,
    /// Requests allowed to wait for a slot.
    pub max_queue_size: usize,
    /// Milliseconds a request may wait.
    pub queue_timeout_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        let defaults = QueueConfig::default();
        Self {
            max_concurrent: defaults.max_concurrent,
            max_queue_size: defaults.max_queue_size,
            queue_timeout_ms: defaults.queue_timeout.as_millis() as u64,
        }
    }
}

impl QueueSection {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig::new()
            .with_max_concurrent(self.max_concurrent)
            .with_max_queue_size(self.max_queue_size)
            .with_queue_timeout(Duration::from_millis(self.queue_timeout_ms))
    }
}

/// `[buffer]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    /// Seconds of inactivity before a run is dropped.
    pub ttl_secs: u64,
    /// Events kept per run.
    pub max_events_per_run: usize,
    /// Run the background expiry sweep.
    pub enable_cleanup_task: bool,
    /// Seconds between sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for BufferSection {
    fn default() -> Self {
        let defaults = BufferConfig::default();
        Self {
            ttl_secs: defaults.ttl.as_secs(),
            max_events_per_run: defaults.max_events_per_run,
            enable_cleanup_task: defaults.enable_cleanup_task,
            cleanup_interval_secs: defaults.cleanup_interval.as_secs(),
        }
    }
}

impl BufferSection {
    pub fn to_buffer_config(&self) -> BufferConfig {
        BufferConfig::new()
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_max_events_per_run(self.max_events_per_run)
            .with_cleanup_task(self.enable_cleanup_task)
            .with_cleanup_interval(Duration::from_secs(self.cleanup_interval_secs))
    }
}

/// `[client]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Base URL of the relay server.
    pub server_url: String,
    /// `[client.reconnect]`.
    pub reconnect: ReconnectSection,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect: ReconnectSection::default(),
        }
    }
}

/// `[client.reconnect]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            enabled: defaults.enabled,
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl ReconnectSection {
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            enabled: self.enabled,
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RelayConfig::from_toml("").unwrap();
        assert_eq!(config, RelayConfig::default());

        let server = config.server_config().unwrap();
        assert_eq!(server.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(server.queue.max_concurrent, 5);
        assert_eq!(server.queue.max_queue_size, 50);
        assert_eq!(server.queue.queue_timeout, Duration::from_secs(60));
        assert_eq!(server.buffer.ttl, Duration::from_secs(300));
        assert_eq!(server.buffer.max_events_per_run, 10_000);
        assert_eq!(server.replay_follow_timeout, Duration::from_secs(30));

        let reconnect = config.reconnect_config();
        assert_eq!(reconnect, ReconnectConfig::default());
        assert_eq!(config.server_url(), DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_partial_sections() {
        let config = RelayConfig::from_toml(
            r#"
[server]
port = 9090

[queue]
max_concurrent = 2
queue_timeout_ms = 500

[client.reconnect]
max_attempts = 5
"#,
        )
        .unwrap();

        let server = config.server_config().unwrap();
        assert_eq!(server.bind_address.port(), 9090);
        assert!(server.request_logging);
        assert_eq!(server.queue.max_concurrent, 2);
        assert_eq!(server.queue.max_queue_size, 50);
        assert_eq!(server.queue.queue_timeout, Duration::from_millis(500));

        let reconnect = config.reconnect_config();
        assert_eq!(reconnect.max_attempts, 5);
        assert!(reconnect.enabled);
        assert_eq!(reconnect.base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = RelayConfig::from_toml(
            r#"
[server]
port = 8080

[queue]
max_concurrent = 8
"#,
        )
        .unwrap();
        let overlay = RelayConfig::from_toml(
            r#"
[server]
port = 3000
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.server.as_ref().unwrap().port, 3000);
        assert_eq!(base.queue.as_ref().unwrap().max_concurrent, 8);
    }

    #[test]
    fn test_validate() {
        assert!(RelayConfig::default().validate().is_ok());

        let zero_slots = RelayConfig::from_toml("[queue]\nmax_concurrent = 0").unwrap();
        assert!(matches!(zero_slots.validate(), Err(ConfigError::Invalid(_))));

        let zero_events = RelayConfig::from_toml("[buffer]\nmax_events_per_run = 0").unwrap();
        assert!(zero_events.validate().is_err());

        let zero_interval =
            RelayConfig::from_toml("[buffer]\ncleanup_interval_secs = 0").unwrap();
        assert!(matches!(zero_interval.validate(), Err(ConfigError::Invalid(_))));

        let zero_ttl = RelayConfig::from_toml("[buffer]\nttl_secs = 0").unwrap();
        assert!(zero_ttl.validate().is_err());

        let too_many = RelayConfig::from_toml("[client.reconnect]\nmax_attempts = 21").unwrap();
        assert!(too_many.validate().is_err());

        let inverted = RelayConfig::from_toml(
            "[client.reconnect]\nbase_delay_ms = 5000\nmax_delay_ms = 1000",
        )
        .unwrap();
        assert!(inverted.validate().is_err());

        let bad_bind = RelayConfig::from_toml("[server]\nbind = \"not-an-ip\"").unwrap();
        assert!(bad_bind.validate().is_err());
    }

    #[test]
    fn test_resolved_fills_missing_sections() {
        let config = RelayConfig::from_toml("[queue]\nmax_concurrent = 3").unwrap();
        let resolved = config.resolved();

        assert_eq!(resolved.queue.as_ref().unwrap().max_concurrent, 3);
        assert_eq!(resolved.server, Some(ServerSection::default()));
        assert_eq!(resolved.client.as_ref().unwrap().server_url, DEFAULT_SERVER_URL);

        let text = resolved.to_toml().unwrap();
        assert!(text.contains("[client.reconnect]"));
        assert_eq!(
            resolved.server_config().unwrap().queue.max_concurrent,
            config.server_config().unwrap().queue.max_concurrent
        );
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = RelayConfig {
            queue: Some(QueueSection {
                max_concurrent: 3,
                ..Default::default()
            }),
            ..Default::default()
        };

        let text = config.to_toml().unwrap();
        assert!(text.contains("[queue]"));
        assert!(!text.contains("[server]"));
        assert_eq!(RelayConfig::from_toml(&text).unwrap(), config);
    }
}
