//! HTTP transport: one POST per JSON-RPC message.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{Transport, TransportKind};
use crate::error::{Error, Result};
use crate::protocol::JsonRpcRequest;

/// Default MCP endpoint.
pub const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:8000/mcp";

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the health check issued on connect.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// MCP endpoint URL.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Health check timeout.
    pub health_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_URL)
    }
}

impl HttpConfig {
    /// Target `url` with default timeouts.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL checked on connect: a trailing `/mcp` becomes `/health`.
    pub fn health_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        match base.strip_suffix("/mcp") {
            Some(root) => format!("{root}/health"),
            None => format!("{base}/health"),
        }
    }
}

/// Transport posting each message to an HTTP endpoint.
///
/// Calls are independent connections, so no request serialization happens
/// here.
pub struct HttpTransport {
    client: Client,
    config: HttpConfig,
}

impl HttpTransport {
    /// Build a reusable client for `config`.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.config.url)
            .json(message)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!(
                "HTTP {} from {}",
                status, self.config.url
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn open(&self) -> Result<()> {
        // No health endpoint is guaranteed to exist; the check never fails.
        let url = self.config.health_url();
        match self
            .client
            .get(&url)
            .timeout(self.config.health_timeout)
            .send()
            .await
        {
            Ok(response) => debug!(%url, status = %response.status(), "health check answered"),
            Err(e) => debug!(%url, "health check failed: {}", e),
        }
        Ok(())
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<Value> {
        self.post(request)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| Error::Connection(format!("invalid JSON response: {e}")))
    }

    async fn notify(&self, notification: &JsonRpcRequest) -> Result<()> {
        self.post(notification).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
