//! Protocol session: handshake sequencing and connection lifecycle.
//!
//! ```text
//! Unconnected ──connect()──▶ Handshaking ──initialize ok──▶ Ready
//!      ▲                          │                          │
//!      └──────handshake failed────┘                    disconnect()
//!                                                            ▼
//!                                                          Closed
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::correlator::RequestCorrelator;
use crate::error::{Error, Result};
use crate::protocol::{ClientInfo, InitializeParams, InitializeResult};
use crate::transport::Transport;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection attempted yet, or the last handshake failed.
    Unconnected,
    /// Transport open, `initialize` exchange in progress.
    Handshaking,
    /// Tool calls allowed.
    Ready,
    /// Torn down. Create a new session to reconnect.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// An MCP session over one transport.
pub struct McpSession {
    correlator: RequestCorrelator,
    client_info: ClientInfo,
    state: RwLock<SessionState>,
    server: RwLock<Option<InitializeResult>>,
    connecting: Mutex<()>,
    closed: watch::Sender<bool>,
}

impl McpSession {
    /// Create an unconnected session over `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_client_info(transport, ClientInfo::default())
    }

    /// Create a session announcing a custom client identity.
    pub fn with_client_info(transport: Arc<dyn Transport>, client_info: ClientInfo) -> Self {
        Self {
            correlator: RequestCorrelator::new(transport),
            client_info,
            state: RwLock::new(SessionState::Unconnected),
            server: RwLock::new(None),
            connecting: Mutex::new(()),
            closed: watch::Sender::new(false),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// What the server reported during the handshake, if one ran.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().await.clone()
    }

    /// Ready and the transport still usable.
    pub async fn is_healthy(&self) -> bool {
        self.state().await == SessionState::Ready && self.correlator.transport().is_alive().await
    }

    /// Open the transport and, where required, run the handshake.
    ///
    /// A no-op when already ready. Fails on a closed session. The state lock
    /// is not held during the exchange, so calls made meanwhile fail fast and
    /// [`disconnect`](Self::disconnect) can abort it.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.connecting.lock().await;
        let mut closed = self.closed.subscribe();

        {
            let mut state = self.state.write().await;
            match *state {
                SessionState::Ready => return Ok(()),
                SessionState::Closed => {
                    return Err(Error::Connection(
                        "session is closed; create a new client to reconnect".into(),
                    ))
                }
                SessionState::Unconnected | SessionState::Handshaking => {}
            }
            *state = SessionState::Handshaking;
        }

        let outcome = tokio::select! {
            outcome = self.establish() => outcome,
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                Err(Error::Connection("session closed during handshake".into()))
            }
        };

        let mut state = self.state.write().await;
        if outcome.is_ok() && *state == SessionState::Handshaking {
            *state = SessionState::Ready;
            info!("MCP session ready");
            return Ok(());
        }
        if *state == SessionState::Handshaking {
            *state = SessionState::Unconnected;
        }
        drop(state);

        // A disconnect may have closed the transport before open() finished.
        if let Err(close_err) = self.correlator.transport().close().await {
            warn!("failed to release transport after handshake error: {}", close_err);
        }
        Err(match outcome {
            Ok(()) => Error::Connection("session closed during handshake".into()),
            Err(e @ Error::Connection(_)) => e,
            Err(other) => Error::Connection(format!("initialize failed: {other}")),
        })
    }

    async fn establish(&self) -> Result<()> {
        let transport = self.correlator.transport();
        transport.open().await?;

        if !transport.kind().requires_handshake() {
            debug!("transport needs no handshake");
            return Ok(());
        }

        let params = serde_json::to_value(InitializeParams::new(self.client_info.clone()))?;
        let result = self.correlator.call("initialize", params).await?;
        match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => {
                info!(
                    server = %init.server_info.name,
                    version = %init.server_info.version,
                    protocol = %init.protocol_version,
                    "MCP server initialized"
                );
                *self.server.write().await = Some(init);
            }
            Err(e) => warn!("unrecognized initialize result: {}", e),
        }

        self.correlator
            .notify("notifications/initialized", None)
            .await
    }

    /// Issue a request. Fails fast unless the session is ready.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let state = self.state().await;
        if state != SessionState::Ready {
            return Err(Error::Connection(format!(
                "cannot call {method}: session is {state}"
            )));
        }
        self.correlator.call(method, params).await
    }

    /// Tear the session down. Idempotent. Aborts a handshake in progress.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == SessionState::Closed {
                return Ok(());
            }
            if *state == SessionState::Handshaking {
                debug!("disconnect during handshake");
            }
            *state = SessionState::Closed;
        }
        self.closed.send_replace(true);

        let result = self.correlator.transport().close().await;
        info!("MCP session closed");
        result
    }
}
