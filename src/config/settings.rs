//! Application settings
//!
//! Loads settings from a TOML file (by default
//! `~/.config/claude-manager/config.toml`). Every field has a default, so a
//! missing file or a partial one is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::StatusRules;

/// Configuration directory name under the user config dir
pub const CONFIG_DIR: &str = "claude-manager";
pub const CONFIG_FILE: &str = "config.toml";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub status: StatusRules,
    pub summary: SummarySettings,
}

/// WebSocket listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to
    pub bind: String,
    /// First port to try
    pub port: u16,
    /// Further ports tried when the first one is taken
    pub port_attempts: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3456,
            port_attempts: 10,
        }
    }
}

/// How session processes are started and buffered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Login shell; `$SHELL` or the platform default when unset
    pub shell: Option<String>,
    /// Command used when a create request does not name one
    pub launch_command: String,
    /// Output chunks retained per session
    pub buffer_capacity: usize,
    /// Size of the PTY before the first client resize
    pub initial_cols: u16,
    pub initial_rows: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            shell: None,
            launch_command: "claude".to_string(),
            buffer_capacity: crate::session::DEFAULT_BUFFER_CAPACITY,
            initial_cols: 80,
            initial_rows: 24,
        }
    }
}

/// Summarization API endpoint used when none is configured
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Summarization API and queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    /// API key; falls back to `ANTHROPIC_API_KEY`
    pub api_key: Option<String>,
    /// API endpoint; `ANTHROPIC_BASE_URL` replaces the default
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Re-queues allowed after a rate-limit response
    pub max_retries: u32,
    /// Pause between consecutive jobs
    pub queue_delay_ms: u64,
    /// Most recent chunks included in a transcript
    pub transcript_chunks: usize,
    /// Character cap applied after ANSI stripping
    pub transcript_max_chars: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 200,
            request_timeout_secs: 60,
            max_retries: 2,
            queue_delay_ms: 1500,
            transcript_chunks: 100,
            transcript_max_chars: 12_000,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load settings from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Fill unset values from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Fill unset values using `lookup` for environment variables
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.summary.api_key.is_none() {
            self.summary.api_key = lookup("ANTHROPIC_API_KEY").filter(|key| !key.is_empty());
        }
        if self.summary.base_url == DEFAULT_BASE_URL {
            if let Some(base_url) = lookup("ANTHROPIC_BASE_URL").filter(|url| !url.is_empty()) {
                self.summary.base_url = base_url;
            }
        }
    }
}
