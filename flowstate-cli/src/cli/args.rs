//! Argument parsing helpers

use anyhow::{bail, Context, Result};
use flowstate_core::models::{EngineConfig, Metadata, WorkflowPriority};
use serde_json::Value;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "~/.config/flowstate/config.toml";

/// Parse a run priority name
pub fn parse_priority(priority: &str) -> Result<WorkflowPriority> {
    match priority.to_ascii_lowercase().as_str() {
        "low" => Ok(WorkflowPriority::Low),
        "normal" => Ok(WorkflowPriority::Normal),
        "high" => Ok(WorkflowPriority::High),
        "critical" => Ok(WorkflowPriority::Critical),
        other => bail!(
            "Invalid priority '{}' (expected low, normal, high or critical)",
            other
        ),
    }
}

/// Parse `KEY=VALUE` pairs; values that are valid JSON keep their type
pub fn parse_metadata(pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Invalid metadata '{}' (expected KEY=VALUE)", pair))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid metadata '{}': key is empty", pair);
        }

        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

/// Resolve the `--config-file` argument, expanding `~/`
pub fn resolve_config_path(config_file: &str) -> Result<PathBuf> {
    if config_file == DEFAULT_CONFIG_FILE {
        return EngineConfig::default_config_path();
    }
    if let Some(rest) = config_file.strip_prefix("~/") {
        let home = home_dir()?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(config_file))
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME environment variable not set")
}
