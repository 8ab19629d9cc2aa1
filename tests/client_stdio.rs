//! Client tests against a shell-script MCP server spoken to over stdio.
//!
//! The stub prints a line of noise on startup, answers `initialize`,
//! `tools/list` and `echo`, and rejects everything else.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};

use linkedin_mcp_client::transport::StdioTransport;
use linkedin_mcp_client::{Error, LinkedInClient, McpSession, ProcessConfig, SessionState};

const STUB_SERVER: &str = r#"
echo "debug: starting up"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"0.0.1"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      echo "not json either"
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"get_job_details","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"method":"echo"'*)
      params=$(printf '%s' "$line" | sed -n 's/.*"method":"echo","params":\(.*\)}$/\1/p')
      printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$params"
      ;;
    *'"method":"crash"'*)
      exit 1
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"unknown method"}}\n' "$id"
      ;;
  esac
done
"#;

fn stub_config(script: &str) -> ProcessConfig {
    ProcessConfig::new("sh", ["-c", script])
}

async fn connected(script: &str) -> LinkedInClient {
    let client = LinkedInClient::stdio(stub_config(script));
    client.connect().await.expect("handshake with stub server");
    client
}

#[tokio::test]
async fn test_handshake_then_list_tools() {
    let client = connected(STUB_SERVER).await;
    assert_eq!(client.session().state().await, SessionState::Ready);

    let info = client.session().server_info().await.unwrap();
    assert_eq!(info.server_info.name, "stub");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "get_job_details");

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_nested_params_round_trip() {
    let client = connected(STUB_SERVER).await;

    let params = json!({
        "query": {"keywords": ["rust", "tokio"], "remote": true},
        "limit": 3
    });
    let result = client.session().call("echo", params.clone()).await.unwrap();
    assert_eq!(result, params);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_each_get_their_own_answer() {
    let client = connected(STUB_SERVER).await;

    let calls = (0..5).map(|n| client.session().call("echo", json!({"n": n})));
    let results: Vec<Value> = join_all(calls)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    for (n, result) in results.iter().enumerate() {
        assert_eq!(result["n"], n);
    }

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_unknown_method_is_tool_error() {
    let client = connected(STUB_SERVER).await;

    let err = client.session().call("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Tool { code: -32601, .. }));

    // The stream is still in sync afterwards.
    let result = client.session().call("echo", json!({"after": 1})).await.unwrap();
    assert_eq!(result["after"], 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_server_exit_is_connection_error() {
    let client = connected(STUB_SERVER).await;

    let err = client.session().call("crash", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_twice() {
    let client = connected(STUB_SERVER).await;

    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.session().state().await, SessionState::Closed);

    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test]
async fn test_missing_executable_fails_connect() {
    let client = LinkedInClient::stdio(ProcessConfig::new(
        "/nonexistent/linkedin-mcp-server",
        Vec::<String>::new(),
    ));

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(client.session().state().await, SessionState::Unconnected);
}

#[tokio::test]
async fn test_stubborn_server_is_killed_after_grace() {
    let script = format!("trap '' TERM\n{STUB_SERVER}\nexec sleep 30\n");
    let client = LinkedInClient::stdio(
        stub_config(&script).with_shutdown_grace(Duration::from_millis(200)),
    );
    client.connect().await.unwrap();

    let started = Instant::now();
    client.disconnect().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!client.session().is_healthy().await);
}

#[tokio::test]
async fn test_cookie_reaches_server_environment() {
    let script = r#"
read -r line
printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"env","version":"1"}}}\n'
read -r line
read -r line
printf '{"jsonrpc":"2.0","id":2,"result":{"cookie":"%s"}}\n' "$LINKEDIN_COOKIE"
"#;
    let client = LinkedInClient::stdio(stub_config(script).with_cookie("AQEDtest"));
    client.connect().await.unwrap();

    let result = client.session().call("whoami", json!({})).await.unwrap();
    assert_eq!(result["cookie"], "AQEDtest");

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_aborts_silent_handshake() {
    let script = "read -r line\nexec sleep 30\n";
    let transport = StdioTransport::new(
        stub_config(script).with_shutdown_grace(Duration::from_millis(200)),
    );
    let session = Arc::new(McpSession::new(Arc::new(transport)));

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.state().await != SessionState::Handshaking {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handshake started");

    let err = tokio::time::timeout(Duration::from_secs(1), session.call("tools/list", json!({})))
        .await
        .expect("call fails fast while handshaking")
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    tokio::time::timeout(Duration::from_secs(5), session.disconnect())
        .await
        .expect("disconnect does not wait for the handshake")
        .unwrap();
    assert_eq!(session.state().await, SessionState::Closed);

    let outcome = tokio::time::timeout(Duration::from_secs(5), connecting)
        .await
        .expect("connect gives up once closed")
        .unwrap();
    assert!(outcome.is_err());
}
