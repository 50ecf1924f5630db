//! REST handlers.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{ApiError, AppState};
use crate::agent::ChatResult;
use crate::provider::{ResourceReadResult, ToolCallResult};
use crate::session::SessionInfo;

/// Session key used when a client omits one.
pub const DEFAULT_SESSION: &str = "default";

fn default_session() -> String {
    DEFAULT_SESSION.to_owned()
}

/// Body of `POST /api/chat` and of each WebSocket text frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// User message.
    pub message: String,
    /// Session key; `"default"` when omitted.
    #[serde(default = "default_session")]
    pub session_id: String,
}

/// Optional provider filter for listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ProviderFilter {
    /// Limit results to this provider.
    pub server_name: Option<String>,
}

/// Body of `POST /api/mcp/tools/execute`.
#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    /// Target provider.
    pub server_name: String,
    /// Tool name on that provider.
    pub tool_name: String,
    /// JSON object of tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Body of `POST /api/mcp/resources/get`.
#[derive(Debug, Deserialize)]
pub struct ResourceRequest {
    /// Target provider.
    pub server_name: String,
    /// Resource URI.
    pub uri: String,
}

pub(super) async fn root() -> Json<Value> {
    Json(json!({ "message": "agent-relay API is running" }))
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "agent-relay" }))
}

pub(super) async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResult> {
    Json(state.agent.chat(&request.message, &request.session_id).await)
}

pub(super) async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "sessions": state.agent.list_sessions() }))
}

pub(super) async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .agent
        .session_info(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Session not found"))
}

pub(super) async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.agent.delete_session(&session_id) {
        info!(session_id, "session deleted");
        Ok(Json(json!({
            "message": format!("Session {session_id} deleted successfully")
        })))
    } else {
        Err(ApiError::not_found("Session not found"))
    }
}

pub(super) async fn list_servers(State(state): State<AppState>) -> Json<Value> {
    let servers: BTreeMap<_, _> = state
        .broker
        .list_providers()
        .await
        .into_iter()
        .map(|status| (status.name.clone(), status))
        .collect();
    Json(json!({ "servers": servers }))
}

pub(super) async fn connect_server(
    State(state): State<AppState>,
    Path(server_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.broker.connect(&server_name).await {
        Ok(()) => Ok(Json(json!({
            "message": format!("Connected to {server_name}"),
            "success": true
        }))),
        Err(err) => Err(ApiError::bad_request(format!(
            "Failed to connect to {server_name}: {err}"
        ))),
    }
}

pub(super) async fn disconnect_server(
    State(state): State<AppState>,
    Path(server_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.broker.disconnect(&server_name).await {
        Ok(Json(json!({
            "message": format!("Disconnected from {server_name}"),
            "success": true
        })))
    } else {
        Err(ApiError::bad_request(format!(
            "Failed to disconnect from {server_name}"
        )))
    }
}

pub(super) async fn list_tools(
    State(state): State<AppState>,
    Query(filter): Query<ProviderFilter>,
) -> Json<Value> {
    let tools = state.broker.list_tools(filter.server_name.as_deref()).await;
    Json(json!({ "tools": tools }))
}

pub(super) async fn list_resources(
    State(state): State<AppState>,
    Query(filter): Query<ProviderFilter>,
) -> Json<Value> {
    let resources = state
        .broker
        .list_resources(filter.server_name.as_deref())
        .await;
    Json(json!({ "resources": resources }))
}

pub(super) async fn execute_tool(
    State(state): State<AppState>,
    Json(request): Json<ToolRequest>,
) -> Json<ToolCallResult> {
    Json(
        state
            .broker
            .call_tool(&request.server_name, &request.tool_name, request.arguments)
            .await,
    )
}

pub(super) async fn read_resource(
    State(state): State<AppState>,
    Json(request): Json<ResourceRequest>,
) -> Json<ResourceReadResult> {
    Json(
        state
            .broker
            .read_resource(&request.server_name, &request.uri)
            .await,
    )
}
