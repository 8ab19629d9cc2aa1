//! Transports carrying JSON-RPC messages to an MCP server.
//!
//! A transport moves one framed request out and brings the matching framed
//! response back. It knows nothing about ids or error codes; that is the
//! [`RequestCorrelator`](crate::correlator::RequestCorrelator)'s job.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::JsonRpcRequest;

pub mod http;
pub mod stdio;

pub use http::{HttpConfig, HttpTransport};
pub use stdio::{LineChannel, PipeTransport, ProcessConfig, StdioTransport};

/// Transport family, which decides how a session is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Newline-delimited JSON over a duplex byte stream.
    Stdio,
    /// One HTTP POST per request.
    Http,
}

impl TransportKind {
    /// Whether the `initialize` handshake must run before tool calls.
    pub fn requires_handshake(self) -> bool {
        matches!(self, TransportKind::Stdio)
    }
}

/// A channel to an MCP server.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Transport family.
    fn kind(&self) -> TransportKind;

    /// Acquire the underlying resource (start the process, check the endpoint).
    async fn open(&self) -> Result<()>;

    /// Send a request and return the raw JSON response.
    ///
    /// Implementations over a shared stream must treat the write and the
    /// matching read as one atomic unit.
    async fn send(&self, request: &JsonRpcRequest) -> Result<Value>;

    /// Send a one-way notification.
    async fn notify(&self, notification: &JsonRpcRequest) -> Result<()>;

    /// Release the underlying resource. Calling this twice is a no-op.
    async fn close(&self) -> Result<()>;

    /// Whether the underlying resource is still usable.
    async fn is_alive(&self) -> bool {
        true
    }
}

/// Transport selection, as read from configuration.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Launch a child process and talk over its stdio.
    Stdio(ProcessConfig),
    /// POST to an HTTP endpoint.
    Http(HttpConfig),
}

impl TransportConfig {
    /// Build the transport described by this configuration.
    pub fn build(self) -> Result<Arc<dyn Transport>> {
        Ok(match self {
            TransportConfig::Stdio(config) => Arc::new(StdioTransport::new(config)),
            TransportConfig::Http(config) => Arc::new(HttpTransport::new(config)?),
        })
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Stdio(ProcessConfig::default())
    }
}
