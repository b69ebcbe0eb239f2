// ABOUTME: Configuration for the tether control side.
// ABOUTME: Loaded from TOML with defaults for dialing and synchronization.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tether_agent::{DialOptions, RetryPolicy, DEFAULT_MAX_ATTEMPTS};

use crate::session::Configuration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub dial: DialConfig,

    /// Default synchronization settings for new sessions
    #[serde(default)]
    pub synchronization: Configuration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialConfig {
    /// Agent launch attempts per connect, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay between attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Local agent binary to install when a transport supports it
    #[serde(default)]
    pub agent_binary: Option<PathBuf>,
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            agent_binary: None,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/tether/config.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("tether")
            .join("config.toml")
    }

    /// Dial options for the agent transports
    pub fn dial_options(&self) -> DialOptions {
        let policy = RetryPolicy::default()
            .with_max_attempts(self.dial.max_attempts)
            .with_backoff(Duration::from_millis(self.dial.backoff_ms));
        let options = DialOptions::default().with_policy(policy);
        match &self.dial.agent_binary {
            Some(binary) => options.with_agent_binary(binary),
            None => options,
        }
    }
}
