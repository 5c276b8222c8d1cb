//! Configuration loading, validation, and management for Weft.
//!
//! Loads configuration from `~/.weft/config.toml` with environment
//! variable overrides. Validates all settings before a pipeline is built.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.weft/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    /// Engine limits and budgets
    #[serde(default)]
    pub engine: EngineConfig,

    /// Stage-trace loop detection
    #[serde(default)]
    pub loop_detection: LoopDetectionConfig,

    /// Context window selection
    #[serde(default)]
    pub window: WindowConfig,

    /// Chat persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Token budget for each context window
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Maximum tokens the backend may generate per reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_budget: Option<u32>,

    /// Corrective resubmissions allowed per `expect` stage
    #[serde(default = "default_max_call_stack")]
    pub max_call_stack: u32,

    /// Invocations of a tool tolerated inside the stage named after it
    #[serde(default = "default_tool_loop_limit")]
    pub tool_loop_limit: u32,

    /// Buffered events per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_token_budget() -> usize {
    4096
}
fn default_max_call_stack() -> u32 {
    3
}
fn default_tool_loop_limit() -> u32 {
    2
}
fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            response_budget: None,
            max_call_stack: default_max_call_stack(),
            tool_loop_limit: default_tool_loop_limit(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionConfig {
    /// Length of the sliding window over executed stage ids
    #[serde(default = "default_loop_window")]
    pub window: usize,

    /// A window seen more often than this is a loop
    #[serde(default = "default_max_repeats")]
    pub max_repeats: usize,
}

fn default_loop_window() -> usize {
    4
}
fn default_max_repeats() -> usize {
    1
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            window: default_loop_window(),
            max_repeats: default_max_repeats(),
        }
    }
}

/// Which window selection strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
    /// Visibility- and key-aware selection under the token budget
    #[default]
    Budget,
    /// The last `latest_count` messages verbatim
    Latest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default)]
    pub strategy: WindowStrategy,

    #[serde(default = "default_latest_count")]
    pub latest_count: usize,
}

fn default_latest_count() -> usize {
    20
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            strategy: WindowStrategy::default(),
            latest_count: default_latest_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "none", "memory" or "file"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_storage_backend() -> String {
    "none".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

const STORAGE_BACKENDS: &[&str] = &["none", "memory", "file"];

impl WeftConfig {
    /// Load configuration from the default path (~/.weft/config.toml).
    ///
    /// Environment variables override file values:
    /// - `WEFT_TOKEN_BUDGET`
    /// - `WEFT_MAX_CALL_STACK`
    /// - `WEFT_STORAGE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("WEFT_TOKEN_BUDGET") {
            self.engine.token_budget = parse_env("WEFT_TOKEN_BUDGET", &raw)?;
        }
        if let Some(raw) = lookup("WEFT_MAX_CALL_STACK") {
            self.engine.max_call_stack = parse_env("WEFT_MAX_CALL_STACK", &raw)?;
        }
        if let Some(backend) = lookup("WEFT_STORAGE") {
            self.storage.backend = backend;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".weft")
    }

    /// Default directory for the file storage backend.
    pub fn chats_dir() -> PathBuf {
        Self::config_dir().join("chats")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "engine.token_budget must be > 0".into(),
            ));
        }

        if self.loop_detection.window == 0 {
            return Err(ConfigError::ValidationError(
                "loop_detection.window must be > 0".into(),
            ));
        }

        if self.window.strategy == WindowStrategy::Latest && self.window.latest_count == 0 {
            return Err(ConfigError::ValidationError(
                "window.latest_count must be > 0 for the latest strategy".into(),
            ));
        }

        if !STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "storage.backend must be one of {}, got '{}'",
                STORAGE_BACKENDS.join(", "),
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::EnvError {
        var: var.to_string(),
        reason: e.to_string(),
    })
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

    #[error("Invalid value in environment variable {var}: {reason}")]
    EnvError { var: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
