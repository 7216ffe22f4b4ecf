//! Logging service

use crate::models::LogLevel;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn default_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "flowstate=error",
        LogLevel::Warn => "flowstate=warn",
        LogLevel::Info => "flowstate=info",
        LogLevel::Debug => "flowstate=debug",
        LogLevel::Trace => "flowstate=trace",
    }
}

/// Build the filter for `level`. `RUST_LOG` takes precedence when set.
///
/// Targets match by prefix, so `flowstate` covers the core library too.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)))
}

/// Initialize logging with the specified level
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: LogLevel) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Log a workflow lifecycle event
pub fn log_workflow_event(event_type: &str, workflow_id: Uuid, details: Option<&str>) {
    tracing::info!(
        event_type = event_type,
        workflow_id = %workflow_id,
        details = details.unwrap_or(""),
        "Workflow event"
    );
}
