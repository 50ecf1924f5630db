//! Provider registry: the set of providers the broker may connect to.
//!
//! Configurations live in a JSON file shaped like
//!
//! ```json
//! {
//!   "servers": {
//!     "memory": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-memory"],
//!       "env": {},
//!       "working_dir": null,
//!       "description": "Persistent memory server",
//!       "enabled": false
//!     }
//!   }
//! }
//! ```
//!
//! A missing file is replaced by a written default set with every provider
//! disabled. An unreadable or malformed file falls back to the same defaults
//! in memory without overwriting the operator's file.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::process::CommandSpec;
use crate::{AppError, Result};

fn default_true() -> bool {
    true
}

/// Launch configuration for one provider subprocess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    /// Unique provider name (the key in the registry file).
    #[serde(skip)]
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides layered on the server's environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the subprocess.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether the broker may connect to this provider.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ProviderConfig {
    /// Process description used to launch the provider.
    #[must_use]
    pub fn command_spec(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(self.command.clone()).args(self.args.iter().cloned());
        spec.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        spec.working_dir.clone_from(&self.working_dir);
        spec
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Config("provider name must not be empty".into()));
        }
        if self.command.trim().is_empty() {
            return Err(AppError::Config(format!(
                "provider {} has an empty command",
                self.name
            )));
        }
        Ok(())
    }
}

/// On-disk layout of the registry file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    servers: BTreeMap<String, Value>,
}

/// Immutable map of provider name → configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Build a registry from already-validated configurations.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any configuration fails validation.
    pub fn from_configs(configs: impl IntoIterator<Item = ProviderConfig>) -> Result<Self> {
        let mut providers = BTreeMap::new();
        for config in configs {
            config.validate()?;
            providers.insert(config.name.clone(), config);
        }
        Ok(Self { providers })
    }

    /// Load the registry from `path`, never failing startup.
    ///
    /// - Missing file: the default set is written to `path` and returned.
    /// - Unreadable or malformed file: the default set is returned and the
    ///   file is left untouched.
    /// - Invalid individual entries are skipped with a warning.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "no provider config found, creating default");
            let defaults = Self::defaults();
            if let Err(err) = defaults.save(path) {
                warn!(path = %path.display(), %err, "failed to write default provider config");
            }
            return defaults;
        }

        let loaded = fs::read_to_string(path)
            .map_err(|err| AppError::Io(format!("failed to read {}: {err}", path.display())))
            .and_then(|raw| Self::from_json_str(&raw));

        match loaded {
            Ok(registry) => {
                info!(count = registry.len(), "loaded provider configurations");
                registry
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "provider config unusable, using defaults");
                Self::defaults()
            }
        }
    }

    /// Parse a registry file body.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the document is not valid JSON or its
    /// `servers` member is not an object. Individual invalid entries are
    /// skipped, not reported as errors.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        let mut providers = BTreeMap::new();

        for (name, value) in file.servers {
            let parsed = serde_json::from_value::<ProviderConfig>(value)
                .map_err(AppError::from)
                .and_then(|mut config| {
                    config.name.clone_from(&name);
                    config.validate()?;
                    Ok(config)
                });

            match parsed {
                Ok(config) => {
                    providers.insert(name, config);
                }
                Err(err) => warn!(provider = %name, %err, "rejecting provider configuration"),
            }
        }

        Ok(Self { providers })
    }

    /// Built-in provider set, all disabled.
    #[must_use]
    pub fn defaults() -> Self {
        let npx = |name: &str, package: &str, extra: &[&str], description: &str| ProviderConfig {
            name: name.to_owned(),
            command: "npx".into(),
            args: ["-y", package]
                .iter()
                .chain(extra)
                .map(|s| (*s).to_owned())
                .collect(),
            env: BTreeMap::new(),
            working_dir: None,
            description: description.to_owned(),
            enabled: false,
        };

        let mut brave = npx(
            "brave-search",
            "@modelcontextprotocol/server-brave-search",
            &[],
            "Brave search server",
        );
        brave
            .env
            .insert("BRAVE_API_KEY".into(), "your_brave_api_key_here".into());

        let providers = [
            npx(
                "filesystem",
                "@modelcontextprotocol/server-filesystem",
                &["/tmp"],
                "File system access server",
            ),
            brave,
            npx(
                "memory",
                "@modelcontextprotocol/server-memory",
                &[],
                "Persistent memory server",
            ),
        ]
        .into_iter()
        .map(|config| (config.name.clone(), config))
        .collect();

        Self { providers }
    }

    /// Persist the registry to `path` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let servers = self
            .providers
            .iter()
            .map(|(name, config)| Ok((name.clone(), serde_json::to_value(config)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let body = serde_json::to_string_pretty(&RegistryFile { servers })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, body)
            .map_err(|err| AppError::Io(format!("failed to write {}: {err}", path.display())))
    }

    /// Configuration for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// All configurations in name order.
    pub fn iter(&self) -> btree_map::Values<'_, String, ProviderConfig> {
        self.providers.values()
    }

    /// Enabled configurations in name order.
    pub fn enabled(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values().filter(|config| config.enabled)
    }

    /// Number of configured providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// `true` when no provider is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
