//! Tool/resource providers reachable over a child-process protocol channel.
//!
//! - [`registry`]: which providers exist and how to launch them.
//! - [`broker`]: live connections, capability aggregation, call routing.
//! - [`mcp`]: the production channel, an MCP client over the provider's stdio.
//!
//! The broker talks to providers only through the [`ProviderLauncher`] and
//! [`ProviderChannel`] traits so the transport can be swapped (tests use an
//! in-process fake).

pub mod broker;
pub mod mcp;
pub mod registry;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

pub use broker::ProviderBroker;
pub use registry::{ProviderConfig, ProviderRegistry};

/// Boxed, sendable future used by the provider traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Tool as advertised in a provider's `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteTool {
    /// Tool name, unique within its provider.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema of the tool's arguments.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Resource as advertised in a provider's `resources/list` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteResource {
    /// Resource URI.
    pub uri: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional media type.
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// Live channel to one provider subprocess, established by a completed
/// initialize handshake.
pub trait ProviderChannel: Send + Sync {
    /// Enumerate the provider's tools.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Provider`](crate::AppError::Provider) on protocol
    /// or transport failure.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<RemoteTool>>>;

    /// Enumerate the provider's resources.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Provider`](crate::AppError::Provider) on protocol
    /// or transport failure.
    fn list_resources(&self) -> BoxFuture<'_, Result<Vec<RemoteResource>>>;

    /// Invoke a tool and return the text of the first content item.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Provider`](crate::AppError::Provider) when the
    /// provider reports a tool error or the call fails in transit.
    fn call_tool(
        &self,
        name: String,
        arguments: Map<String, Value>,
    ) -> BoxFuture<'_, Result<Option<String>>>;

    /// Read a resource and return the text of the first content item.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Provider`](crate::AppError::Provider) on failure.
    fn read_resource(&self, uri: String) -> BoxFuture<'_, Result<Option<String>>>;

    /// Shut the channel down and terminate the subprocess.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Provider`](crate::AppError::Provider) if teardown
    /// fails; the subprocess is still killed when the channel is dropped.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Starts provider subprocesses and performs the initialize handshake.
pub trait ProviderLauncher: Send + Sync {
    /// Launch the provider described by `config` and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Provider`](crate::AppError::Provider) if the
    /// process cannot be started or the handshake fails.
    fn launch(&self, config: ProviderConfig) -> BoxFuture<'_, Result<Box<dyn ProviderChannel>>>;
}

/// Lifecycle state of one provider as seen by the broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    /// No configuration with this name exists.
    Unconfigured,
    /// Configured but not connected.
    Disconnected,
    /// A connect handshake is in flight.
    Connecting,
    /// Handshake complete; capabilities are discoverable.
    Connected,
}

/// Discovered tool, tagged with its owning provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// Description; empty when the provider gave none.
    pub description: String,
    /// Owning provider.
    pub server_name: String,
    /// `properties` object of the tool's input schema.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Tag a remote tool with its provider name.
    #[must_use]
    pub fn from_remote(provider: &str, tool: RemoteTool) -> Self {
        let parameters = tool
            .input_schema
            .get("properties")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            server_name: provider.to_owned(),
            parameters,
        }
    }
}

/// Discovered resource, tagged with its owning provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResourceDescriptor {
    /// Resource URI.
    pub uri: String,
    /// Display name; the URI when the provider gave none.
    pub name: String,
    /// Description; empty when the provider gave none.
    pub description: String,
    /// Owning provider.
    pub server_name: String,
    /// Media type, if known.
    pub mime_type: Option<String>,
}

impl ResourceDescriptor {
    /// Tag a remote resource with its provider name.
    #[must_use]
    pub fn from_remote(provider: &str, resource: RemoteResource) -> Self {
        let name = resource
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| resource.uri.clone());
        Self {
            uri: resource.uri,
            name,
            description: resource.description.unwrap_or_default(),
            server_name: provider.to_owned(),
            mime_type: resource.mime_type,
        }
    }
}

/// Aggregated capability view across connected providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Capabilities {
    /// Tools of every matching connected provider.
    pub tools: Vec<ToolDescriptor>,
    /// Resources of every matching connected provider.
    pub resources: Vec<ResourceDescriptor>,
}

/// Status row for one configured provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProviderStatus {
    /// Provider name.
    pub name: String,
    /// Configured description.
    pub description: String,
    /// Whether the provider may be connected.
    pub enabled: bool,
    /// Whether a live connection exists.
    pub connected: bool,
    /// Number of discovered tools (0 when disconnected).
    pub tools_count: usize,
    /// Number of discovered resources (0 when disconnected).
    pub resources_count: usize,
}

/// Outcome of a tool call routed through the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCallResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// Failure description.
    pub error: Option<String>,
    /// Text of the first content item, if any.
    pub result: Option<String>,
}

impl ToolCallResult {
    /// Successful call.
    #[must_use]
    pub fn ok(result: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            result,
        }
    }

    /// Failed call.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            result: None,
        }
    }
}

/// Outcome of a resource read routed through the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResourceReadResult {
    /// Whether the read succeeded.
    pub success: bool,
    /// Failure description.
    pub error: Option<String>,
    /// Text of the first content item, if any.
    pub content: Option<String>,
}

impl ResourceReadResult {
    /// Successful read.
    #[must_use]
    pub fn ok(content: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            content,
        }
    }

    /// Failed read.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            content: None,
        }
    }
}

/// Aggregate result of [`ProviderBroker::connect_all_enabled`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectSummary {
    /// Providers connected by this call (or already connected).
    pub connected: usize,
    /// Enabled providers attempted.
    pub total: usize,
}
