//! Main client implementation.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use relay_types::{LAST_EVENT_ID_HEADER, QueueStats, RUN_ID_HEADER, StreamRequest};

use crate::error::{Error, ErrorResponse, Result};
use crate::reconnect::{ReconnectConfig, ReconnectingStreamClient, StreamMetadata};
use crate::transport::HttpTransport;

/// Default timeout for requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for streaming requests.
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Relay API client.
///
/// # Example
///
/// ```no_run
/// use relay_client::RelayClient;
///
/// # async fn example() -> relay_client::Result<()> {
/// let client = RelayClient::builder()
///     .base_url("http://localhost:8080")
///     .build()?;
///
/// let stats = client.queue_stats().await?;
/// println!("{} active, {} queued", stats.active, stats.queued);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    stream_timeout: Duration,
}

/// Health check response.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

impl RelayClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client with default settings pointing to localhost.
    pub fn localhost() -> Result<Self> {
        Self::builder().base_url("http://127.0.0.1:8080").build()
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Check server health.
    pub async fn health(&self) -> Result<HealthStatus> {
        self.get("health").await
    }

    /// Whether the server answers its health check.
    pub async fn is_healthy(&self) -> bool {
        self.health().await.is_ok_and(|h| h.status == "ok")
    }

    /// Current admission queue occupancy.
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.get("queue").await
    }

    /// An HTTP stream transport bound to this client.
    pub fn transport(&self) -> HttpTransport {
        HttpTransport::new(self.clone())
    }

    /// A reconnecting stream client over HTTP.
    pub fn reconnecting(&self, config: ReconnectConfig) -> ReconnectingStreamClient<HttpTransport> {
        ReconnectingStreamClient::new(self.transport(), config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal HTTP methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a URL for a server path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner.base_url.join(path).map_err(Error::from)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = self
            .inner
            .http
            .get(url)
            .timeout(self.inner.timeout)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(extract_error(response).await)
        }
    }

    /// `POST /stream`, resuming from `resume` when it names a run.
    pub(crate) async fn post_stream(
        &self,
        request: &StreamRequest,
        resume: &StreamMetadata,
    ) -> Result<reqwest::Response> {
        let url = self.url("stream")?;
        let mut builder = self
            .inner
            .http
            .post(url)
            .json(request)
            .timeout(self.inner.stream_timeout);

        if let Some(run_id) = &resume.run_id {
            builder = builder.header(RUN_ID_HEADER, run_id);
            if let Some(last_event_id) = &resume.last_event_id {
                builder = builder.header(LAST_EVENT_ID_HEADER, last_event_id);
            }
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(extract_error(response).await);
        }
        Ok(response)
    }
}

/// Extract an error from a failed response.
async fn extract_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();

    match response.json::<ErrorResponse>().await {
        Ok(err) => Error::Api {
            status,
            code: err.code,
            message: err.message,
        },
        Err(_) => Error::Api {
            status,
            code: "unknown".to_string(),
            message: format!("HTTP {}", status),
        },
    }
}

/// Builder for creating a [`RelayClient`].
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: Option<String>,
    timeout: Duration,
    stream_timeout: Duration,
    user_agent: Option<String>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            user_agent: None,
        }
    }

    /// Set the base URL for the server.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the streaming request timeout.
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<RelayClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("relay-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        Ok(RelayClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                timeout: self.timeout,
                stream_timeout: self.stream_timeout,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_builder_requires_base_url() {
        let result = ClientBuilder::new().build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_normalizes_base_url() {
        let client = RelayClient::builder()
            .base_url("http://localhost:8080/relay")
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8080/relay/");
        assert_eq!(
            client.url("/stream").unwrap().as_str(),
            "http://localhost:8080/relay/stream"
        );
    }

    #[test]
    fn test_invalid_url() {
        let result = RelayClient::builder().base_url("not a url").build();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": 2,
                "queued": 1,
                "maxConcurrent": 5,
                "maxQueueSize": 50,
                "available": 3
            })))
            .mount(&server)
            .await;

        let client = RelayClient::builder().base_url(server.uri()).build().unwrap();
        let stats = client.queue_stats().await.unwrap();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.available, 3);
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "ok", "version": "0.0.0"})),
            )
            .mount(&server)
            .await;

        let client = RelayClient::builder().base_url(server.uri()).build().unwrap();
        assert!(client.is_healthy().await);
    }
}
