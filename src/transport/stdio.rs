//! Newline-delimited JSON transports.
//!
//! One JSON object per line in each direction. The server may interleave
//! diagnostic text on the same stream; anything that is not a JSON object is
//! discarded rather than treated as protocol data.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Transport, TransportKind};
use crate::credentials::COOKIE_ENV_VAR;
use crate::error::{Error, Result};
use crate::protocol::JsonRpcRequest;

/// How long a server gets to exit after termination is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command line used to launch the MCP server.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Executable.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment overrides, applied on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Grace period between the termination request and a forced kill.
    pub shutdown_grace: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new(
            "uvx",
            [
                "--from",
                "git+https://github.com/stickerdaniel/linkedin-mcp-server",
                "linkedin-mcp-server",
            ],
        )
    }
}

impl ProcessConfig {
    /// Launch `command` with `args`.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            cwd: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Set an environment variable for the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Hand a session cookie to the server through its environment.
    pub fn with_cookie(self, cookie: &str) -> Self {
        self.with_env(COOKIE_ENV_VAR, cookie)
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

// ============================================================================
// Line channel
// ============================================================================

/// Reads and writes newline-delimited JSON over a byte stream pair.
pub struct LineChannel<R, W> {
    reader: BufReader<R>,
    writer: W,
    buf: Vec<u8>,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap a reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            buf: Vec::new(),
        }
    }

    /// Write one message followed by a newline.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Connection(format!("failed to write to server: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Connection(format!("failed to flush to server: {e}")))?;
        Ok(())
    }

    /// Read lines until one holds a response object.
    ///
    /// Blank lines, non-JSON text, bare JSON scalars and server-initiated
    /// messages (anything carrying `method`) are skipped.
    pub async fn read_response(&mut self) -> Result<Value> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| Error::Connection(format!("failed to read from server: {e}")))?;

            if read == 0 {
                return Err(Error::Connection("server closed connection".into()));
            }

            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(line) {
                Ok(value) if value.is_object() => {
                    if let Some(method) = value.get("method").and_then(Value::as_str) {
                        debug!(method, "skipping server-initiated message");
                        continue;
                    }
                    return Ok(value);
                }
                _ => debug!("ignored server output: {}", line),
            }
        }
    }
}

// ============================================================================
// Pipe transport
// ============================================================================

/// Stdio-style transport over an arbitrary byte stream pair.
///
/// Useful for in-process servers; the session runs the same handshake as it
/// does for a child process.
pub struct PipeTransport<R, W> {
    channel: Mutex<Option<LineChannel<R, W>>>,
    closed: AtomicBool,
}

impl<R, W> PipeTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap a reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            channel: Mutex::new(Some(LineChannel::new(reader, writer))),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for PipeTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("pipe already closed".into()));
        }
        Ok(())
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<Value> {
        let mut guard = self.channel.lock().await;
        let channel = self.usable(&mut guard)?;
        channel.write_message(request).await?;
        channel.read_response().await
    }

    async fn notify(&self, notification: &JsonRpcRequest) -> Result<()> {
        let mut guard = self.channel.lock().await;
        self.usable(&mut guard)?.write_message(notification).await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the writer signals EOF to the other side. With a read in
        // flight the channel is dropped by the next caller instead.
        match self.channel.try_lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(_) => debug!("pipe busy; released on next use"),
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl<R, W> PipeTransport<R, W> {
    fn usable<'a>(
        &self,
        guard: &'a mut Option<LineChannel<R, W>>,
    ) -> Result<&'a mut LineChannel<R, W>> {
        if self.closed.load(Ordering::SeqCst) {
            guard.take();
        }
        guard
            .as_mut()
            .ok_or_else(|| Error::Connection("pipe closed".into()))
    }
}

// ============================================================================
// Subprocess transport
// ============================================================================

type ChildChannel = LineChannel<ChildStdout, ChildStdin>;

/// Transport that launches the MCP server as a child process.
///
/// The process handle and the pipes sit behind separate locks, so the
/// process can be terminated while a read is still waiting on it.
pub struct StdioTransport {
    config: ProcessConfig,
    child: Mutex<Option<Child>>,
    channel: Mutex<Option<ChildChannel>>,
}

impl StdioTransport {
    /// Create a transport; the process starts on [`Transport::open`].
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
            channel: Mutex::new(None),
        }
    }

    /// Launch configuration.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    fn spawn(&self) -> Result<(Child, ChildChannel)> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Connection(format!("failed to start '{}': {e}", self.config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("server process has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("server process has no stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, self.config.command.clone()));
        }

        Ok((child, LineChannel::new(stdout, stdin)))
    }

    /// The pipes, unless the process was closed in the meantime.
    async fn usable<'a>(&self, guard: &'a mut Option<ChildChannel>) -> Result<&'a mut ChildChannel> {
        if guard.is_some() && self.child.lock().await.is_none() {
            guard.take();
        }
        guard.as_mut().ok_or_else(|| {
            Error::Connection("server process not running; call connect() first".into())
        })
    }

    fn release_channel(&self) {
        match self.channel.try_lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(_) => debug!("read in flight; pipes released after exit"),
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn open(&self) -> Result<()> {
        let mut child_guard = self.child.lock().await;
        if child_guard.is_some() {
            return Ok(());
        }

        let (child, channel) = self.spawn()?;
        info!(
            command = %self.config.command,
            pid = ?child.id(),
            "started MCP server process"
        );
        *child_guard = Some(child);
        drop(child_guard);
        *self.channel.lock().await = Some(channel);
        Ok(())
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<Value> {
        let mut guard = self.channel.lock().await;
        let channel = self.usable(&mut guard).await?;
        channel.write_message(request).await?;
        channel.read_response().await
    }

    async fn notify(&self, notification: &JsonRpcRequest) -> Result<()> {
        let mut guard = self.channel.lock().await;
        self.usable(&mut guard).await?.write_message(notification).await
    }

    async fn close(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        // Closing stdin is the first hint; most servers exit on EOF.
        self.release_channel();
        request_termination(&child);

        match tokio::time::timeout(self.config.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "MCP server process exited"),
            Ok(Err(e)) => warn!("failed to wait for MCP server process: {}", e),
            Err(_) => {
                warn!(
                    grace = ?self.config.shutdown_grace,
                    "MCP server did not exit in time, killing it"
                );
                if let Err(e) = child.kill().await {
                    warn!("failed to kill MCP server process: {}", e);
                }
            }
        }
        self.release_channel();
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, "SIGTERM failed: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}

async fn forward_stderr(stderr: ChildStderr, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %command, "stderr: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_noise_before_response_is_discarded() {
        let reader = Builder::new()
            .read(b"debug: starting up\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n")
            .build();
        let mut channel = LineChannel::new(reader, tokio::io::sink());

        let response = channel.read_response().await.unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["ok"], true);
    }

    #[tokio::test]
    async fn test_notifications_and_scalars_are_skipped() {
        let reader = Builder::new()
            .read(b"\n42\n\"hello\"\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":[]}\n")
            .build();
        let mut channel = LineChannel::new(reader, tokio::io::sink());

        let response = channel.read_response().await.unwrap();
        assert_eq!(response["id"], 3);
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let reader = Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",")
            .read(b"\"id\":9,\"result\":null}\n")
            .build();
        let mut channel = LineChannel::new(reader, tokio::io::sink());
        assert_eq!(channel.read_response().await.unwrap()["id"], 9);
    }

    #[tokio::test]
    async fn test_eof_before_response_is_connection_error() {
        let reader = Builder::new().read(b"still booting\n").build();
        let mut channel = LineChannel::new(reader, tokio::io::sink());

        let err = channel.read_response().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_write_message_is_newline_terminated() {
        let writer = Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\",\"params\":{}}\n")
            .build();
        let mut channel = LineChannel::new(tokio::io::empty(), writer);

        let request = JsonRpcRequest::new(1, "tools/list", json!({}));
        channel.write_message(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_open_fails_fast() {
        let transport = StdioTransport::new(ProcessConfig::new("definitely-not-started", Vec::<String>::new()));
        let request = JsonRpcRequest::new(1, "tools/list", json!({}));

        let err = transport.send(&request).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(!transport.is_alive().await);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let transport = StdioTransport::new(ProcessConfig::new(
            "/nonexistent/linkedin-mcp-server",
            Vec::<String>::new(),
        ));
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_close_without_open_is_noop() {
        let transport = StdioTransport::new(ProcessConfig::default());
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_pipe_transport_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = PipeTransport::new(client_read, client_write);

        let server_task = tokio::spawn(async move {
            let (server_read, server_write) = tokio::io::split(server);
            let mut channel = LineChannel::new(server_read, server_write);
            // The request reads like a response-less object with a method, so
            // read it raw instead.
            let mut line = String::new();
            channel.reader.read_line(&mut line).await.unwrap();
            let request: JsonRpcRequest = serde_json::from_str(&line).unwrap();
            channel
                .write_message(&json!({"jsonrpc": "2.0", "id": request.id, "result": {"pong": true}}))
                .await
                .unwrap();
        });

        let response = transport
            .send(&JsonRpcRequest::new(1, "ping", json!({})))
            .await
            .unwrap();
        assert_eq!(response["result"]["pong"], true);
        server_task.await.unwrap();

        transport.close().await.unwrap();
        assert!(!transport.is_alive().await);
        assert!(transport.open().await.is_err());
    }

    #[tokio::test]
    async fn test_pipe_close_does_not_wait_for_pending_read() {
        let (client, _server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = std::sync::Arc::new(PipeTransport::new(client_read, client_write));

        let pending = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(&JsonRpcRequest::new(1, "ping", json!({}))).await }
        });
        while transport.channel.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_secs(1), transport.close())
            .await
            .expect("close returns while a read is pending")
            .unwrap();
        assert!(!transport.is_alive().await);

        pending.abort();
        let _ = pending.await;
        let err = transport
            .send(&JsonRpcRequest::new(2, "ping", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
