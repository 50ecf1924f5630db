//! Provider broker: live connections, capability aggregation, call routing.
//!
//! Each configured provider moves through an explicit state machine:
//!
//! ```text
//! Unconfigured   (no registry entry; terminal)
//! Disconnected ──connect──▶ Connecting ──handshake ok──▶ Connected
//!      ▲                        │                            │
//!      └──── handshake failed ──┘◀──────── disconnect ───────┘
//! ```
//!
//! Only `Connecting` and `Connected` are stored; `Disconnected` is the
//! absence of an entry. A failed handshake closes the half-open channel and
//! leaves nothing behind. The handshake and the slot update that ends it run
//! in their own task, so a caller that gives up mid-connect never strands a
//! `Connecting` entry. Every provider operation is bounded by a timeout
//! so one stuck provider cannot stall bulk connect or shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{
    Capabilities, ConnectSummary, ProviderChannel, ProviderConfig, ProviderLauncher,
    ProviderRegistry, ProviderState, ProviderStatus, ResourceDescriptor, ResourceReadResult,
    ToolCallResult, ToolDescriptor,
};
use crate::config::ProviderTimeouts;
use crate::{AppError, Result};

/// Established connection to one provider.
pub struct ProviderConnection {
    config: ProviderConfig,
    channel: Box<dyn ProviderChannel>,
    tools: Vec<ToolDescriptor>,
    resources: Vec<ResourceDescriptor>,
}

impl ProviderConnection {
    /// Configuration the connection was launched from.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Tools discovered during the handshake.
    #[must_use]
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Resources discovered during the handshake.
    #[must_use]
    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }
}

impl std::fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConnection")
            .field("name", &self.config.name)
            .field("tools", &self.tools.len())
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Slot {
    Connecting,
    Connected(Arc<ProviderConnection>),
}

type Slots = Arc<RwLock<HashMap<String, Slot>>>;

/// Owner of every live provider connection.
pub struct ProviderBroker {
    registry: ProviderRegistry,
    launcher: Arc<dyn ProviderLauncher>,
    timeouts: ProviderTimeouts,
    slots: Slots,
}

impl std::fmt::Debug for ProviderBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBroker")
            .field("registry", &self.registry)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ProviderBroker {
    /// Create a broker with no live connections.
    #[must_use]
    pub fn new(
        registry: ProviderRegistry,
        launcher: Arc<dyn ProviderLauncher>,
        timeouts: ProviderTimeouts,
    ) -> Self {
        Self {
            registry,
            launcher,
            timeouts,
            slots: Arc::default(),
        }
    }

    /// The registry this broker connects from.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Current lifecycle state of `name`.
    pub async fn state(&self, name: &str) -> ProviderState {
        if self.registry.get(name).is_none() {
            return ProviderState::Unconfigured;
        }
        match self.slots.read().await.get(name) {
            None => ProviderState::Disconnected,
            Some(Slot::Connecting) => ProviderState::Connecting,
            Some(Slot::Connected(_)) => ProviderState::Connected,
        }
    }

    /// Connect to `name`, discovering its tools and resources.
    ///
    /// Succeeds without side effects when already connected.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound`: no configuration named `name`.
    /// - `AppError::Provider`: the provider is disabled, a connect is already
    ///   in flight, or launch/handshake/discovery failed or timed out.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let config = self
            .registry
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("provider config not found: {name}")))?
            .clone();

        if !config.enabled {
            info!(provider = name, "provider is disabled");
            return Err(AppError::Provider(format!("provider {name} is disabled")));
        }

        {
            let mut slots = self.slots.write().await;
            match slots.get(name) {
                Some(Slot::Connected(_)) => {
                    debug!(provider = name, "already connected");
                    return Ok(());
                }
                Some(Slot::Connecting) => {
                    return Err(AppError::Provider(format!(
                        "connection to {name} already in progress"
                    )));
                }
                None => {
                    slots.insert(name.to_owned(), Slot::Connecting);
                }
            }
        }

        let span = info_span!("provider_connect", provider = name);
        let task = tokio::spawn(
            establish(
                Arc::clone(&self.launcher),
                Arc::clone(&self.slots),
                config,
                self.timeouts.connect(),
            )
            .instrument(span),
        );

        match task.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                self.slots.write().await.remove(name);
                error!(provider = name, %join_err, "connect task failed");
                Err(AppError::Provider(format!(
                    "connect to {name} failed: {join_err}"
                )))
            }
        }
    }

    /// Disconnect from `name` and terminate its subprocess.
    ///
    /// Returns `false` when the provider was not connected. Teardown errors
    /// are logged; the connection is removed regardless.
    pub async fn disconnect(&self, name: &str) -> bool {
        let removed = {
            let mut slots = self.slots.write().await;
            if matches!(slots.get(name), Some(Slot::Connected(_))) {
                slots.remove(name)
            } else {
                None
            }
        };

        let Some(Slot::Connected(connection)) = removed else {
            warn!(provider = name, "not connected to provider");
            return false;
        };

        match tokio::time::timeout(self.timeouts.request(), connection.channel.close()).await {
            Ok(Ok(())) => info!(provider = name, "disconnected from provider"),
            Ok(Err(err)) => warn!(provider = name, %err, "provider teardown failed"),
            Err(_elapsed) => warn!(provider = name, "provider teardown timed out"),
        }
        true
    }

    /// Invoke `tool` on `provider` with a JSON object of arguments.
    ///
    /// Never fails: unknown providers, argument errors, provider-side errors
    /// and timeouts all come back as `success == false`.
    pub async fn call_tool(&self, provider: &str, tool: &str, arguments: Value) -> ToolCallResult {
        let Some(connection) = self.connection(provider).await else {
            return ToolCallResult::failure(format!("Not connected to server: {provider}"));
        };

        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return ToolCallResult::failure(format!(
                    "tool arguments must be a JSON object, got {other}"
                ));
            }
        };

        let call = connection.channel.call_tool(tool.to_owned(), arguments);
        match bounded(self.timeouts.request(), call).await {
            Ok(result) => ToolCallResult::ok(result),
            Err(err) => {
                error!(provider, tool, %err, "error executing tool");
                ToolCallResult::failure(err.to_string())
            }
        }
    }

    /// Read `uri` from `provider`.
    ///
    /// Never fails; errors come back as `success == false`.
    pub async fn read_resource(&self, provider: &str, uri: &str) -> ResourceReadResult {
        let Some(connection) = self.connection(provider).await else {
            return ResourceReadResult::failure(format!("Not connected to server: {provider}"));
        };

        let read = connection.channel.read_resource(uri.to_owned());
        match bounded(self.timeouts.request(), read).await {
            Ok(content) => ResourceReadResult::ok(content),
            Err(err) => {
                error!(provider, uri, %err, "error reading resource");
                ResourceReadResult::failure(err.to_string())
            }
        }
    }

    /// Tools and resources of connected providers, optionally limited to one.
    pub async fn list_capabilities(&self, provider: Option<&str>) -> Capabilities {
        let slots = self.slots.read().await;
        let mut capabilities = Capabilities::default();
        for connection in connected(&slots, provider) {
            capabilities.tools.extend(connection.tools.iter().cloned());
            capabilities
                .resources
                .extend(connection.resources.iter().cloned());
        }
        capabilities
    }

    /// Tools of connected providers, optionally limited to one.
    pub async fn list_tools(&self, provider: Option<&str>) -> Vec<ToolDescriptor> {
        let slots = self.slots.read().await;
        connected(&slots, provider)
            .flat_map(|connection| connection.tools.iter().cloned())
            .collect()
    }

    /// Resources of connected providers, optionally limited to one.
    pub async fn list_resources(&self, provider: Option<&str>) -> Vec<ResourceDescriptor> {
        let slots = self.slots.read().await;
        connected(&slots, provider)
            .flat_map(|connection| connection.resources.iter().cloned())
            .collect()
    }

    /// Status of every configured provider, in name order.
    pub async fn list_providers(&self) -> Vec<ProviderStatus> {
        let slots = self.slots.read().await;
        self.registry
            .iter()
            .map(|config| {
                let connection = match slots.get(&config.name) {
                    Some(Slot::Connected(connection)) => Some(connection),
                    _ => None,
                };
                ProviderStatus {
                    name: config.name.clone(),
                    description: config.description.clone(),
                    enabled: config.enabled,
                    connected: connection.is_some(),
                    tools_count: connection.map_or(0, |c| c.tools.len()),
                    resources_count: connection.map_or(0, |c| c.resources.len()),
                }
            })
            .collect()
    }

    /// Names of currently connected providers.
    pub async fn connected_names(&self) -> Vec<String> {
        self.slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Connected(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Connect every enabled provider concurrently.
    ///
    /// One provider's failure never blocks another.
    pub async fn connect_all_enabled(&self) -> ConnectSummary {
        let names: Vec<String> = self
            .registry
            .enabled()
            .map(|config| config.name.clone())
            .collect();
        if names.is_empty() {
            info!("no enabled providers to connect");
            return ConnectSummary::default();
        }

        let results = join_all(names.iter().map(|name| self.connect(name))).await;
        let summary = ConnectSummary {
            connected: results.iter().filter(|r| r.is_ok()).count(),
            total: names.len(),
        };
        info!(
            connected = summary.connected,
            total = summary.total,
            "connected to enabled providers"
        );
        summary
    }

    /// Disconnect every connected provider concurrently.
    ///
    /// Returns how many connections were torn down.
    pub async fn disconnect_all(&self) -> usize {
        let names = self.connected_names().await;
        if names.is_empty() {
            return 0;
        }

        let results = join_all(names.iter().map(|name| self.disconnect(name))).await;
        let count = results.into_iter().filter(|done| *done).count();
        info!(count, "disconnected from all providers");
        count
    }

    async fn connection(&self, name: &str) -> Option<Arc<ProviderConnection>> {
        match self.slots.read().await.get(name) {
            Some(Slot::Connected(connection)) => Some(Arc::clone(connection)),
            _ => None,
        }
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Launch and discover `config` under `connect_timeout`, then settle its slot.
///
/// Runs as a detached task; the slot always ends `Connected` or removed.
async fn establish(
    launcher: Arc<dyn ProviderLauncher>,
    slots: Slots,
    config: ProviderConfig,
    connect_timeout: Duration,
) -> Result<()> {
    let name = config.name.clone();
    let outcome = tokio::time::timeout(connect_timeout, handshake(launcher.as_ref(), config))
        .await
        .unwrap_or_else(|_elapsed| {
            Err(AppError::Provider(format!(
                "connect to {name} timed out after {connect_timeout:?}"
            )))
        });

    let mut slots = slots.write().await;
    match outcome {
        Ok(connection) => {
            info!(
                provider = %name,
                tools = connection.tools.len(),
                resources = connection.resources.len(),
                "connected to provider"
            );
            slots.insert(name, Slot::Connected(Arc::new(connection)));
            Ok(())
        }
        Err(err) => {
            slots.remove(&name);
            error!(provider = %name, %err, "error connecting to provider");
            Err(err)
        }
    }
}

async fn handshake(
    launcher: &dyn ProviderLauncher,
    config: ProviderConfig,
) -> Result<ProviderConnection> {
    let name = config.name.clone();
    let channel = launcher.launch(config.clone()).await?;

    match discover(channel.as_ref(), &name).await {
        Ok((tools, resources)) => Ok(ProviderConnection {
            config,
            channel,
            tools,
            resources,
        }),
        Err(err) => {
            if let Err(close_err) = channel.close().await {
                debug!(provider = %name, %close_err, "closing half-open channel failed");
            }
            Err(err)
        }
    }
}

/// List tools and resources and tag them with the provider name.
async fn discover(
    channel: &dyn ProviderChannel,
    provider: &str,
) -> Result<(Vec<ToolDescriptor>, Vec<ResourceDescriptor>)> {
    let tools = channel
        .list_tools()
        .await?
        .into_iter()
        .map(|tool| ToolDescriptor::from_remote(provider, tool))
        .collect();
    let resources = channel
        .list_resources()
        .await?
        .into_iter()
        .map(|resource| ResourceDescriptor::from_remote(provider, resource))
        .collect();
    Ok((tools, resources))
}

/// Connected entries, optionally filtered by provider name.
fn connected<'a>(
    slots: &'a HashMap<String, Slot>,
    provider: Option<&'a str>,
) -> impl Iterator<Item = &'a Arc<ProviderConnection>> + 'a {
    slots.iter().filter_map(move |(name, slot)| match slot {
        Slot::Connected(connection) if provider.is_none_or(|p| p == name) => Some(connection),
        _ => None,
    })
}

/// Apply the request timeout to a provider future.
async fn bounded<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_elapsed| {
            Err(AppError::Provider(format!(
                "provider request timed out after {timeout:?}"
            )))
        })
}
