//! Request/response correlation.
//!
//! Allocates request ids, checks that every response answers the request that
//! produced it, and turns error descriptors into typed errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcId, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;

/// Matches outgoing requests with their responses over one transport.
pub struct RequestCorrelator {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
}

impl RequestCorrelator {
    /// Correlate requests sent over `transport`. Ids start at 1.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// The transport requests travel over.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Id the next request will carry.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send `method` and wait for its result.
    ///
    /// The id is consumed even if the call fails.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.allocate_id();
        let request = JsonRpcRequest::new(id, method, params);
        debug!(id, method, "MCP → request");

        let raw = self.transport.send(&request).await?;
        let response: JsonRpcResponse = serde_json::from_value(raw)
            .map_err(|e| Error::Connection(format!("malformed response to {method}: {e}")))?;
        debug!(id, method, is_error = response.error.is_some(), "MCP ← response");

        check_id(id, &response)?;
        resolve(response)
    }

    /// Send a one-way notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        debug!(method, "MCP → notification");
        self.transport
            .notify(&JsonRpcRequest::notification(method, params))
            .await
    }
}

/// Reject responses that do not answer request `id`.
///
/// An error response with a null id is tolerated: servers send those when
/// they could not read the request at all.
fn check_id(id: u64, response: &JsonRpcResponse) -> Result<()> {
    match &response.id {
        Some(got) if *got == JsonRpcId::from(id) => Ok(()),
        None if response.error.is_some() => Ok(()),
        other => Err(Error::Connection(format!(
            "unmatched response id: expected {id}, got {other:?}"
        ))),
    }
}

/// Turn a response into its result payload or a typed error.
pub fn resolve(response: JsonRpcResponse) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(Error::from_rpc(error));
    }
    Ok(response.result.unwrap_or_else(|| Value::Object(Map::new())))
}
