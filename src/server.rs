//! Worker-side MCP server.
//!
//! Dispatches JSON-RPC messages to the tool registry. Over stdio it follows
//! the MCP lifecycle (`initialize` before any tool call); the stateless
//! variant used behind HTTP accepts tool calls directly.

#[cfg(feature = "http")]
pub mod http;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserSession;
use crate::error::{codes, Result};
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcId, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpMessage, ServerCapabilities, ServerInfo, ToolCallParams, ToolsCapability,
    PROTOCOL_VERSION,
};
use crate::tools::{ToolContext, ToolRegistry};

/// Server name.
pub const SERVER_NAME: &str = "linkedin-mcp-worker";

/// Server version.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialization.
    Uninitialized,
    /// Server is initialized and ready.
    Ready,
    /// Server is shutting down.
    ShuttingDown,
}

/// MCP server exposing the LinkedIn tools.
pub struct McpServer {
    state: RwLock<ServerState>,
    tools: ToolRegistry,
    stateless: bool,
}

impl McpServer {
    /// Server that requires the `initialize` handshake.
    pub fn new(context: ToolContext) -> Self {
        Self::with_registry(ToolRegistry::new(context), false)
    }

    /// Server that accepts tool calls without a handshake.
    pub fn stateless(context: ToolContext) -> Self {
        Self::with_registry(ToolRegistry::new(context), true)
    }

    /// Server over a prepared registry.
    pub fn with_registry(tools: ToolRegistry, stateless: bool) -> Self {
        Self {
            state: RwLock::new(ServerState::Uninitialized),
            tools,
            stateless,
        }
    }

    /// Current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Tool registry.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Shared browser resource.
    pub fn browser(&self) -> &Arc<BrowserSession> {
        &self.tools.context().browser
    }

    /// Run the server on the process's stdin/stdout.
    pub async fn run_stdio(&self) -> Result<()> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC until EOF or shutdown, then close the
    /// browser.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP worker starting");
        let served = self.serve_lines(reader, writer).await;

        match self.browser().close().await {
            Ok(true) => info!("browser closed"),
            Ok(false) => {}
            Err(e) => warn!("failed to close browser: {}", e),
        }
        info!("MCP worker shutting down");
        served
    }

    async fn serve_lines<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            if let Some(response) = self.handle_message(line).await {
                let mut json = serde_json::to_string(&response)?;
                debug!("Sending: {}", json);
                json.push('\n');
                writer.write_all(json.as_bytes()).await?;
                writer.flush().await?;
            }

            if self.state().await == ServerState::ShuttingDown {
                break;
            }
        }
        Ok(())
    }

    /// Handle an incoming message.
    pub async fn handle_message(&self, json: &str) -> Option<JsonRpcResponse> {
        match McpMessage::parse(json) {
            Ok(McpMessage::Request(request)) => Some(self.handle_request(request).await),
            Ok(McpMessage::Notification(notification)) => {
                self.handle_notification(notification).await;
                None
            }
            Ok(McpMessage::Response(_)) => {
                debug!("ignoring response sent to the worker");
                None
            }
            Err(e) => Some(JsonRpcResponse::error(None, codes::PARSE_ERROR, e.to_string())),
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params).await,
            "tools/list" => self.handle_tools_list(id).await,
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "ping" => JsonRpcResponse::success(id, json!({})),
            "shutdown" => {
                *self.state.write().await = ServerState::ShuttingDown;
                JsonRpcResponse::success(id, json!({}))
            }
            _ => JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("method not found: {}", request.method),
            ),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcRequest) {
        match notification.method.as_str() {
            "notifications/initialized" => info!("Client initialized"),
            "notifications/cancelled" => debug!("Request cancelled by client"),
            "exit" => *self.state.write().await = ServerState::ShuttingDown,
            other => debug!("Unknown notification: {}", other),
        }
    }

    async fn handle_initialize(&self, id: Option<JsonRpcId>, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid initialize params: {e}"),
                )
            }
            None => {
                return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "initialize params required")
            }
        };

        info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            protocol = %params.protocol_version,
            "initialize"
        );
        *self.state.write().await = ServerState::Ready;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                logging: None,
            },
            server_info: ServerInfo {
                name: SERVER_NAME.into(),
                version: SERVER_VERSION.into(),
            },
        };
        JsonRpcResponse::success(id, result)
    }

    async fn accepts_calls(&self) -> bool {
        self.stateless || self.state().await == ServerState::Ready
    }

    async fn handle_tools_list(&self, id: Option<JsonRpcId>) -> JsonRpcResponse {
        if !self.accepts_calls().await {
            return JsonRpcResponse::error(id, codes::INVALID_REQUEST, "server not initialized");
        }
        JsonRpcResponse::success(id, ListToolsResult { tools: self.tools.list_tools() })
    }

    async fn handle_tools_call(&self, id: Option<JsonRpcId>, params: Option<Value>) -> JsonRpcResponse {
        if !self.accepts_calls().await {
            return JsonRpcResponse::error(id, codes::INVALID_REQUEST, "server not initialized");
        }

        let params: ToolCallParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid tool call params: {e}"),
                )
            }
            None => return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "tool call params required"),
        };

        match self.tools.execute(&params.name, params.arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                error!(tool = %params.name, code = e.code(), "tool failed: {}", e);
                JsonRpcResponse::from_error(id, e.to_json_rpc_error())
            }
        }
    }
}
