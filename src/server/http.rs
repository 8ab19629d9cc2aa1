//! HTTP front end for the worker.
//!
//! `POST /mcp` takes one JSON-RPC message per request. Session registration
//! and health endpoints sit next to it for the out-of-band cookie handoff.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{McpServer, SERVER_NAME, SERVER_VERSION};
use crate::credentials::FileCredentialProvider;
use crate::error::{Error, Result};

/// Shared state for HTTP handlers.
#[derive(Clone)]
struct AppState {
    server: Arc<McpServer>,
    cookies: Arc<FileCredentialProvider>,
}

/// Build the router.
pub fn router(server: Arc<McpServer>, cookies: FileCredentialProvider) -> Router {
    let state = AppState {
        server,
        cookies: Arc::new(cookies),
    };

    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .route("/api/session", post(session_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `addr` until the process exits.
pub async fn serve(server: Arc<McpServer>, cookies: FileCredentialProvider, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "MCP worker listening");
    axum::serve(listener, router(server, cookies)).await?;
    Ok(())
}

async fn mcp_handler(State(state): State<AppState>, body: String) -> Response {
    match state.server.handle_message(&body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let browser = state.server.browser().status().await;
    Json(json!({
        "status": "ok",
        "server": SERVER_NAME,
        "version": SERVER_VERSION,
        "has_session": state.cookies.has_cookie().await,
        "browser": browser,
    }))
}

#[derive(Deserialize)]
struct SessionRequest {
    li_at: String,
}

async fn session_handler(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> impl IntoResponse {
    match state.cookies.register_cookie(&request.li_at).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": "Session updated"})),
        ),
        Err(e) => (
            status_for(&e),
            Json(json!({"success": false, "message": e.to_string()})),
        ),
    }
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidParams(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
