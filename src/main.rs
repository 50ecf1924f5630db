#![forbid(unsafe_code)]

//! `agent-relay` server binary.
//!
//! Bootstraps configuration, detects the agent CLI, loads the provider
//! registry, connects enabled providers in the background, and serves the
//! HTTP/WebSocket API until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::agent::AgentManager;
use agent_relay::config::GlobalConfig;
use agent_relay::http::{self, AppState};
use agent_relay::provider::mcp::McpLauncher;
use agent_relay::provider::{ProviderBroker, ProviderRegistry};
use agent_relay::session::SessionStore;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Agent session and MCP provider broker", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the provider registry file.
    #[arg(long)]
    providers: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(providers) = args.providers {
        config.providers_file = providers;
    }
    info!(addr = %config.bind_addr(), "configuration loaded");

    // ── Build services ──────────────────────────────────
    let sessions = Arc::new(SessionStore::new(
        config.session_root.clone(),
        config.session_prefix.clone(),
    ));
    let agent = Arc::new(AgentManager::detect(config.agent.clone(), sessions).await);

    let registry = ProviderRegistry::load(&config.providers_file);
    let broker = Arc::new(ProviderBroker::new(
        registry,
        Arc::new(McpLauncher),
        config.providers.clone(),
    ));

    // Connecting providers must not delay the listener.
    let connect_broker = Arc::clone(&broker);
    let connect_handle = tokio::spawn(async move {
        connect_broker.connect_all_enabled().await;
    });

    // ── Serve HTTP ──────────────────────────────────────
    let ct = CancellationToken::new();
    let state = AppState {
        agent: Arc::clone(&agent),
        broker: Arc::clone(&broker),
    };
    let http_ct = ct.clone();
    let bind_addr = config.bind_addr();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(state, &bind_addr, http_ct.clone()).await {
            error!(%err, "http server failed");
            http_ct.cancel();
        }
    });

    info!("agent-relay ready");

    // ── Wait for shutdown signal ────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        _ = ct.cancelled() => {}
    }
    ct.cancel();

    if let Err(err) = http_handle.await {
        error!(%err, "http task panicked");
    }

    // ── Graceful shutdown ───────────────────────────────
    connect_handle.abort();
    graceful_shutdown(&broker, &agent)
        .instrument(tracing::info_span!("graceful_shutdown"))
        .await;

    Ok(())
}

/// Tear down provider connections, then session directories.
async fn graceful_shutdown(broker: &ProviderBroker, agent: &AgentManager) {
    let disconnected = broker.disconnect_all().await;
    let removed = agent.shutdown();
    info!(disconnected, removed, "agent-relay shut down");
}

async fn shutdown_signal() {
    let ctrl_c = wait_ctrl_c(tokio::signal::ctrl_c());

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

/// Await the ctrl-c listener, logging a failed handler instead of dropping it.
async fn wait_ctrl_c(ctrl_c: impl std::future::Future<Output = std::io::Result<()>>) {
    if let Err(err) = ctrl_c.await {
        error!(%err, "ctrl-c signal handler failed");
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
