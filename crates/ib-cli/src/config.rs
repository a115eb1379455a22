//! Configuration loading for the ioc-bridge CLI.

use anyhow::{Context, Result};
use ib_plugins::redact::{mask_sensitive_json, mask_value};
use ib_plugins::http::{DEFAULT_WAIT_TIME, MAX_API_CALLS};
use ib_plugins::{Action, HostSettings, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding pull checkpoints. Defaults to the user data directory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Whether to verify TLS certificates of vendor APIs.
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Proxy URL applied to every plugin.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts for rate-limited and server-error responses.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds to wait between those attempts.
    #[serde(default = "default_retry_wait")]
    pub retry_wait_secs: u64,

    /// Configured plugins, by name.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginEntry>,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    MAX_API_CALLS
}

fn default_retry_wait() -> u64 {
    DEFAULT_WAIT_TIME
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            verify_tls: default_true(),
            proxy: None,
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            retry_wait_secs: default_retry_wait(),
            plugins: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Network settings handed to every plugin.
    pub fn host_settings(&self) -> HostSettings {
        HostSettings {
            verify_tls: self.verify_tls,
            proxy: self.proxy.clone(),
            timeout_secs: self.timeout_secs,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                wait: Duration::from_secs(self.retry_wait_secs),
            },
        }
    }

    /// Resolved checkpoint directory.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("com", "ioc-bridge", "ioc-bridge")
            .map(|dirs| dirs.data_dir().join("state"))
            .unwrap_or_else(|| PathBuf::from("state"))
    }

    /// Looks up an enabled plugin entry.
    pub fn plugin(&self, name: &str) -> Result<&PluginEntry> {
        let entry = self
            .plugins
            .get(name)
            .with_context(|| format!("No plugin named '{}' is configured", name))?;
        if !entry.enabled {
            anyhow::bail!("Plugin '{}' is disabled", name);
        }
        Ok(entry)
    }

    /// Creates a copy with secrets redacted.
    pub fn redact_secrets(&self) -> Self {
        let mut config = self.clone();

        if let Some(proxy) = config.proxy.as_mut() {
            if proxy.contains('@') {
                *proxy = mask_value(proxy);
            }
        }
        for entry in config.plugins.values_mut() {
            entry.config = mask_sensitive_json(&entry.config);
        }

        config
    }
}

/// The vendor a plugin entry talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Misp,
    Forescout,
    Syslog,
    VisoTrust,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginKind::Misp => "misp",
            PluginKind::Forescout => "forescout",
            PluginKind::Syslog => "syslog",
            PluginKind::VisoTrust => "viso_trust",
        };
        f.write_str(name)
    }
}

/// One configured plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    pub kind: PluginKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Plugin-specific configuration parameters.
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,

    /// Sharing actions configured for this plugin.
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl PluginEntry {
    /// Returns the configured action with the given value, or the first one.
    pub fn action(&self, value: Option<&str>) -> Option<&Action> {
        match value {
            Some(value) => self.actions.iter().find(|a| a.value == value),
            None => self.actions.first(),
        }
    }
}
