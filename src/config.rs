//! Configuration management for shcmd.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::execution::{resolve_timeout_secs, DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution defaults.
    pub execution: ExecutionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Execution defaults applied to every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Timeout in seconds. Non-positive values mean the 60 second default.
    pub timeout_secs: f64,
    /// Chunk size for streamed output, in bytes.
    pub chunk_size: usize,
    /// Merge command environment into the parent's instead of replacing it.
    pub inherit_env: bool,
    /// Return non-zero exits as data instead of failing.
    pub warn_only: bool,
}

impl ExecutionSection {
    /// Resolved timeout.
    pub fn timeout(&self) -> Duration {
        resolve_timeout_secs(self.timeout_secs)
    }
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            inherit_env: true,
            warn_only: false,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Config = serde_json::from_str(&content).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(timeout) = std::env::var("SHCMD_TIMEOUT") {
            self.execution.timeout_secs = timeout
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SHCMD_TIMEOUT", timeout))?;
        }

        if let Ok(size) = std::env::var("SHCMD_CHUNK_SIZE") {
            self.execution.chunk_size = size
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SHCMD_CHUNK_SIZE", size))?;
        }

        if let Ok(level) = std::env::var("SHCMD_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(timeout) = args.timeout {
            self.execution.timeout_secs = timeout;
        }

        if let Some(size) = args.chunk_size {
            self.execution.chunk_size = size;
        }

        if args.warn_only {
            self.execution.warn_only = true;
        }

        if args.no_inherit_env {
            self.execution.inherit_env = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env()?;
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Check values that have no sensible fallback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("chunk_size", "0".to_string()));
        }
        Ok(())
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid setting value.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidValue(name, value) => write!(f, "invalid value for {}: '{}'", name, value),
        }
    }
}

impl std::error::Error for ConfigError {}
