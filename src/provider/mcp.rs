//! MCP client channel over a provider subprocess's stdio.
//!
//! [`McpLauncher`] spawns the configured command, performs the MCP
//! initialize handshake, and hands back an [`McpChannel`] that keeps the
//! running client service alive until [`ProviderChannel::close`] is called
//! or the channel is dropped (which also kills the child).

use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    BoxFuture, ProviderChannel, ProviderConfig, ProviderLauncher, RemoteResource, RemoteTool,
};
use crate::{AppError, Result};

/// Launches providers as MCP servers speaking over stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpLauncher;

impl ProviderLauncher for McpLauncher {
    fn launch(&self, config: ProviderConfig) -> BoxFuture<'_, Result<Box<dyn ProviderChannel>>> {
        Box::pin(async move {
            let channel = McpChannel::start(&config).await?;
            Ok(Box::new(channel) as Box<dyn ProviderChannel>)
        })
    }
}

/// Initialized MCP client session with one provider.
pub struct McpChannel {
    name: String,
    peer: Peer<RoleClient>,
    supports_resources: bool,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl std::fmt::Debug for McpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpChannel")
            .field("name", &self.name)
            .field("supports_resources", &self.supports_resources)
            .finish_non_exhaustive()
    }
}

impl McpChannel {
    /// Spawn the provider and complete the initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Provider` if the process cannot be spawned or the
    /// handshake fails.
    pub async fn start(config: &ProviderConfig) -> Result<Self> {
        let spec = config.command_spec();
        debug!(provider = %config.name, command = %spec.display(), "launching provider");

        let transport = TokioChildProcess::new(spec.to_command()).map_err(|err| {
            AppError::Provider(format!("failed to spawn provider {}: {err}", config.name))
        })?;

        let service = ().serve(transport).await.map_err(|err| {
            AppError::Provider(format!("handshake with {} failed: {err}", config.name))
        })?;

        let supports_resources = service
            .peer_info()
            .is_some_and(|info| info.capabilities.resources.is_some());
        if let Some(info) = service.peer_info() {
            info!(
                provider = %config.name,
                server = %info.server_info.name,
                version = %info.server_info.version,
                "provider initialized"
            );
        }

        Ok(Self {
            name: config.name.clone(),
            peer: service.peer().clone(),
            supports_resources,
            service: Mutex::new(Some(service)),
        })
    }

    fn protocol_error(&self, what: &str, err: impl std::fmt::Display) -> AppError {
        AppError::Provider(format!("{what} on {} failed: {err}", self.name))
    }
}

impl ProviderChannel for McpChannel {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<RemoteTool>>> {
        Box::pin(async move {
            let tools = self
                .peer
                .list_all_tools()
                .await
                .map_err(|err| self.protocol_error("tools/list", err))?;
            tools.iter().map(reshape).collect()
        })
    }

    fn list_resources(&self) -> BoxFuture<'_, Result<Vec<RemoteResource>>> {
        Box::pin(async move {
            if !self.supports_resources {
                return Ok(Vec::new());
            }
            let resources = self
                .peer
                .list_all_resources()
                .await
                .map_err(|err| self.protocol_error("resources/list", err))?;
            resources.iter().map(reshape).collect()
        })
    }

    fn call_tool(
        &self,
        name: String,
        arguments: Map<String, Value>,
    ) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            let params = serde_json::from_value(json!({
                "name": name,
                "arguments": arguments,
            }))?;
            let result = self
                .peer
                .call_tool(params)
                .await
                .map_err(|err| self.protocol_error("tools/call", err))?;
            tool_output(&serde_json::to_value(&result)?)
        })
    }

    fn read_resource(&self, uri: String) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            let params = serde_json::from_value(json!({ "uri": uri }))?;
            let result = self
                .peer
                .read_resource(params)
                .await
                .map_err(|err| self.protocol_error("resources/read", err))?;
            Ok(first_text(&serde_json::to_value(&result)?, "contents"))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(service) = self.service.lock().await.take() else {
                return Ok(());
            };
            let reason = service
                .cancel()
                .await
                .map_err(|err| AppError::Provider(format!("closing {} failed: {err}", self.name)))?;
            debug!(provider = %self.name, ?reason, "provider session closed");
            Ok(())
        })
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Re-read a protocol object through its wire shape.
fn reshape<S: Serialize, T: DeserializeOwned>(item: &S) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(item)?)?)
}

/// Text of the first item in `body[key]`, if it carries any.
fn first_text(body: &Value, key: &str) -> Option<String> {
    body.get(key)?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
        .map(str::to_owned)
}

/// Project a `tools/call` result onto its first text item, turning a
/// provider-reported tool error into `Err`.
fn tool_output(body: &Value) -> Result<Option<String>> {
    let text = first_text(body, "content");
    if body.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(AppError::Provider(
            text.unwrap_or_else(|| "tool reported an error".into()),
        ));
    }
    Ok(text)
}
