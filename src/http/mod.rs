//! HTTP and WebSocket front end.
//!
//! A thin axum layer over [`AgentManager`] and [`ProviderBroker`]. Handlers
//! translate between JSON bodies and the core types and never hold state of
//! their own.

pub mod routes;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::AgentManager;
use crate::provider::ProviderBroker;
use crate::{AppError, Result};

/// Services shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Chat orchestration and session bookkeeping.
    pub agent: Arc<AgentManager>,
    /// Provider connections.
    pub broker: Arc<ProviderBroker>,
}

/// Error body returned for the few non-200 outcomes (`{"detail": ...}`).
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    /// 404 with the given detail.
    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    /// 400 with the given detail.
    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/api/chat", post(routes::chat))
        .route("/api/sessions", get(routes::list_sessions))
        .route(
            "/api/sessions/{session_id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/api/mcp/servers", get(routes::list_servers))
        .route(
            "/api/mcp/servers/{server_name}/connect",
            post(routes::connect_server),
        )
        .route(
            "/api/mcp/servers/{server_name}/disconnect",
            post(routes::disconnect_server),
        )
        .route("/api/mcp/tools", get(routes::list_tools))
        .route("/api/mcp/resources", get(routes::list_resources))
        .route("/api/mcp/tools/execute", post(routes::execute_tool))
        .route("/api/mcp/resources/get", post(routes::read_resource))
        .route("/ws/{client_id}", get(ws::upgrade))
        .with_state(state)
}

/// Bind `addr` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the listener cannot be bound or the server
/// fails.
pub async fn serve(state: AppState, addr: &str, ct: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {addr}: {err}")))?;
    serve_on(state, listener, ct).await
}

/// Serve on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve_on(state: AppState, listener: TcpListener, ct: CancellationToken) -> Result<()> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("http server shut down");
    Ok(())
}
