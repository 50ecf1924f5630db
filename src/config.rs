//! Global configuration parsing and validation.
//!
//! Every field has a serde default so an absent or partial `config.toml`
//! still yields a runnable server.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_session_root() -> PathBuf {
    std::env::temp_dir()
}

fn default_session_prefix() -> String {
    "agent_session_".into()
}

fn default_providers_file() -> PathBuf {
    PathBuf::from("mcp-servers.json")
}

fn default_candidates() -> Vec<Vec<String>> {
    vec![
        vec!["claude".into()],
        vec!["npx".into(), "@anthropic-ai/claude-code".into()],
        vec!["claude-code".into()],
    ]
}

fn default_agent_args() -> Vec<String> {
    [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--dangerously-skip-permissions",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_detect_seconds() -> u64 {
    5
}

fn default_probe_seconds() -> u64 {
    10
}

fn default_invocation_seconds() -> u64 {
    180
}

fn default_connect_seconds() -> u64 {
    60
}

fn default_request_seconds() -> u64 {
    30
}

/// External agent invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Candidate invocation forms probed in order at startup.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<Vec<String>>,
    /// Arguments appended to the detected command for a real invocation.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Optional MCP config file forwarded via `--mcp-config`.
    #[serde(default)]
    pub mcp_config: Option<PathBuf>,
    /// Timeout for each availability probe at startup.
    #[serde(default = "default_detect_seconds")]
    pub detect_timeout_seconds: u64,
    /// Timeout for the per-request readiness probe.
    #[serde(default = "default_probe_seconds")]
    pub probe_timeout_seconds: u64,
    /// Timeout for a full agent invocation.
    #[serde(default = "default_invocation_seconds")]
    pub invocation_timeout_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            args: default_agent_args(),
            mcp_config: None,
            detect_timeout_seconds: default_detect_seconds(),
            probe_timeout_seconds: default_probe_seconds(),
            invocation_timeout_seconds: default_invocation_seconds(),
        }
    }
}

impl AgentConfig {
    /// Short profile used for availability detection.
    #[must_use]
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout_seconds)
    }

    /// Short profile used for readiness probes.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    /// Long profile used for real agent invocations.
    #[must_use]
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_seconds)
    }
}

/// Provider broker timeouts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProviderTimeouts {
    /// Bound on launch + handshake + capability discovery.
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    /// Bound on a single tool call, resource read, or teardown.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            connect_seconds: default_connect_seconds(),
            request_seconds: default_request_seconds(),
        }
    }
}

impl ProviderTimeouts {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_seconds)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_seconds)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port; 0 lets the OS pick one.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory under which per-session working directories are created.
    #[serde(default = "default_session_root")]
    pub session_root: PathBuf,
    /// Prefix for per-session working directory names.
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    /// Path of the provider registry file.
    #[serde(default = "default_providers_file")]
    pub providers_file: PathBuf,
    /// External agent settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Provider broker timeouts.
    #[serde(default)]
    pub providers: ProviderTimeouts,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_root: default_session_root(),
            session_prefix: default_session_prefix(),
            providers_file: default_providers_file(),
            agent: AgentConfig::default(),
            providers: ProviderTimeouts::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address string for the HTTP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.candidates.iter().any(Vec::is_empty) {
            return Err(AppError::Config(
                "agent.candidates entries must not be empty".into(),
            ));
        }

        if self.agent.detect_timeout_seconds == 0
            || self.agent.probe_timeout_seconds == 0
            || self.agent.invocation_timeout_seconds == 0
        {
            return Err(AppError::Config(
                "agent timeouts must be greater than zero".into(),
            ));
        }

        if self.providers.connect_seconds == 0 || self.providers.request_seconds == 0 {
            return Err(AppError::Config(
                "provider timeouts must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
