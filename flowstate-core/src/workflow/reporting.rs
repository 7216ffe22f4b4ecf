//! Rendering of workflow reports and system statistics

use crate::error::{EngineError, EngineResult};
use crate::models::report::{ReportFormat, SystemStats, WorkflowReport};
use serde::Serialize;
use std::fmt::Write;

fn to_json<T: Serialize>(value: &T) -> EngineResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| EngineError::Report(e.to_string()))
}

fn to_yaml<T: Serialize>(value: &T) -> EngineResult<String> {
    serde_yaml::to_string(value).map_err(|e| EngineError::Report(e.to_string()))
}

/// Render a single run
pub fn render_workflow_report(report: &WorkflowReport, format: ReportFormat) -> EngineResult<String> {
    match format {
        ReportFormat::Json => to_json(report),
        ReportFormat::Yaml => to_yaml(report),
        ReportFormat::Text => Ok(workflow_report_text(report)),
    }
}

/// Render aggregate statistics
pub fn render_system_stats(stats: &SystemStats, format: ReportFormat) -> EngineResult<String> {
    match format {
        ReportFormat::Json => to_json(stats),
        ReportFormat::Yaml => to_yaml(stats),
        ReportFormat::Text => Ok(system_stats_text(stats)),
    }
}

fn workflow_report_text(report: &WorkflowReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Workflow: {} ({})", report.workflow_name, report.workflow_id);
    let _ = writeln!(out, "Status: {:?}", report.status);
    let _ = writeln!(out, "Current state: {}", report.current_state);
    let _ = writeln!(out, "Priority: {:?}", report.priority);
    let _ = writeln!(out, "Retry count: {}", report.retry_count);
    let _ = writeln!(out, "Created: {}", report.created_at.to_rfc3339());
    let _ = writeln!(out, "Updated: {}", report.updated_at.to_rfc3339());
    if let Some(completed) = report.completed_at {
        let _ = writeln!(out, "Completed: {}", completed.to_rfc3339());
    }
    if let Some(error) = &report.error {
        let _ = writeln!(out, "Error: {}", error);
    }

    if !report.metadata.is_empty() {
        let _ = writeln!(out, "Metadata:");
        let mut keys: Vec<&String> = report.metadata.keys().collect();
        keys.sort();
        for key in keys {
            let _ = writeln!(out, "  {}: {}", key, report.metadata[key]);
        }
    }

    let _ = writeln!(out, "State history ({} entries):", report.state_history.len());
    for (i, step) in report.state_history.iter().enumerate() {
        let _ = write!(
            out,
            "  {}. {} [{:?}] {}ms",
            i + 1,
            step.state_name,
            step.status,
            step.duration_ms
        );
        if let Some(error) = &step.error {
            let _ = write!(out, " error: {}", error);
        }
        out.push('\n');
    }

    out
}

fn system_stats_text(stats: &SystemStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "System statistics ({})", stats.generated_at.to_rfc3339());
    let _ = writeln!(out, "  Total workflows:   {}", stats.total_workflows);
    let _ = writeln!(out, "  Pending:           {}", stats.pending_workflows);
    let _ = writeln!(out, "  Active:            {}", stats.active_workflows);
    let _ = writeln!(out, "  Successful:        {}", stats.successful_workflows);
    let _ = writeln!(out, "  Failed:            {}", stats.failed_workflows);
    let _ = writeln!(out, "  Timed out:         {}", stats.timed_out_workflows);
    let _ = writeln!(out, "  State transitions: {}", stats.total_state_transitions);
    out
}
