//! Configuration loading, validation, and management for Chartwise.
//!
//! Loads configuration from `~/.chartwise/config.toml` (or the file named by
//! `CHARTWISE_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.chartwise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the decision service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// System prompt sent ahead of every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool-provider processes launched for every run
    #[serde(default = "default_tool_servers")]
    pub tool_servers: Vec<ToolServerConfig>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_system_prompt() -> String {
    "You are a stock market analyst. Use the available tools to look up \
     technical indicators before answering. Call one tool at a time and \
     answer concisely once you have enough information."
        .into()
}
fn default_tool_servers() -> Vec<ToolServerConfig> {
    vec![ToolServerConfig::new("ta", "chartwise-ta-server")]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("gateway", &self.gateway)
            .field("agent", &self.agent)
            .field("tool_servers", &self.tool_servers)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of decide calls per run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Timeout for one decide call
    #[serde(default = "default_decide_timeout_secs")]
    pub decide_timeout_secs: u64,

    /// Most recent steps replayed to the model
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_max_steps() -> usize {
    10
}
fn default_decide_timeout_secs() -> u64 {
    60
}
fn default_history_limit() -> usize {
    20
}

impl AgentConfig {
    pub fn decide_timeout(&self) -> Duration {
        Duration::from_secs(self.decide_timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            decide_timeout_secs: default_decide_timeout_secs(),
            history_limit: default_history_limit(),
        }
    }
}

/// One tool-provider process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Name used in logs and error messages
    pub name: String,

    /// Executable to launch
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overlay on top of the host environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl ToolServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl AppConfig {
    /// Load configuration from `CHARTWISE_CONFIG` or `~/.chartwise/config.toml`.
    ///
    /// Environment overrides:
    /// - `CHARTWISE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CHARTWISE_MODEL`
    /// - `CHARTWISE_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Path `load` reads: `CHARTWISE_CONFIG` if set, else the default file.
    pub fn config_path() -> PathBuf {
        std::env::var("CHARTWISE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CHARTWISE_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = lookup("OPENAI_API_KEY");
        }

        if let Some(model) = lookup("CHARTWISE_MODEL") {
            self.model = model;
        }

        if let Some(base_url) = lookup("CHARTWISE_BASE_URL") {
            self.base_url = base_url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chartwise")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.history_limit must be at least 1".into(),
            ));
        }

        if self.agent.decide_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.decide_timeout_secs must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.tool_servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool_servers entries need a name".into(),
                ));
            }
            if server.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "tool server '{}' has an empty command",
                    server.name
                )));
            }
            if server.handshake_timeout_secs == 0 || server.call_timeout_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "tool server '{}' timeouts must be > 0",
                    server.name
                )));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate tool server name '{}'",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            tool_servers: default_tool_servers(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
