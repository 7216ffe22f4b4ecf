//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of workflow steps executing at once
    pub max_concurrent_workflows: usize,
    /// Monitoring loop period in milliseconds
    pub monitoring_interval_ms: u64,
    /// How long `stop_system` waits for in-flight steps, in milliseconds
    pub shutdown_grace_ms: u64,
    /// Timeout applied to states that do not declare one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_state_timeout_ms: Option<u64>,
    /// Logging verbosity level
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            monitoring_interval_ms: 5000,
            shutdown_grace_ms: 5000,
            default_state_timeout_ms: None,
            log_level: LogLevel::Info,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: EngineConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(EngineConfig::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> anyhow::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("flowstate").join("config.toml"))
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn default_state_timeout(&self) -> Option<Duration> {
        self.default_state_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_concurrent_workflows == 0 {
            errors.push("max_concurrent_workflows must be at least 1".to_string());
        }
        if self.max_concurrent_workflows > 1000 {
            errors.push("max_concurrent_workflows cannot exceed 1000".to_string());
        }

        if self.monitoring_interval_ms < 10 {
            errors.push("monitoring_interval_ms must be at least 10".to_string());
        }

        if self.shutdown_grace_ms > 600_000 {
            errors.push("shutdown_grace_ms cannot exceed 600000 (10 minutes)".to_string());
        }

        if self.default_state_timeout_ms == Some(0) {
            errors.push("default_state_timeout_ms must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
