//! Reporting data models

use crate::models::workflow::{
    Metadata, StateExecutionResult, WorkflowInstance, WorkflowPriority, WorkflowStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output format for exported reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
    Text,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "yaml" | "yml" => Ok(ReportFormat::Yaml),
            "text" | "txt" => Ok(ReportFormat::Text),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// Aggregate counters across all workflow runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStats {
    pub total_workflows: usize,
    pub pending_workflows: usize,
    pub active_workflows: usize,
    /// Runs that ended COMPLETED
    pub successful_workflows: usize,
    /// Runs that ended FAILED or TIMEOUT
    pub failed_workflows: usize,
    /// Subset of `failed_workflows` that ended TIMEOUT
    pub timed_out_workflows: usize,
    /// Recorded state execution entries across all runs
    pub total_state_transitions: usize,
    pub generated_at: DateTime<Utc>,
}

impl SystemStats {
    /// Aggregate a set of run snapshots
    pub fn from_instances<'a, I>(instances: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkflowInstance>,
    {
        let mut stats = SystemStats {
            total_workflows: 0,
            pending_workflows: 0,
            active_workflows: 0,
            successful_workflows: 0,
            failed_workflows: 0,
            timed_out_workflows: 0,
            total_state_transitions: 0,
            generated_at: Utc::now(),
        };

        for instance in instances {
            stats.total_workflows += 1;
            stats.total_state_transitions += instance.history.len();
            match instance.status {
                WorkflowStatus::Pending => stats.pending_workflows += 1,
                WorkflowStatus::Active => stats.active_workflows += 1,
                WorkflowStatus::Completed => stats.successful_workflows += 1,
                WorkflowStatus::Failed => stats.failed_workflows += 1,
                WorkflowStatus::Timeout => {
                    stats.failed_workflows += 1;
                    stats.timed_out_workflows += 1;
                }
            }
        }

        stats
    }
}

/// Serializable view of a single workflow run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowReport {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub current_state: String,
    pub status: WorkflowStatus,
    pub priority: WorkflowPriority,
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Always present, possibly empty
    pub state_history: Vec<StateExecutionResult>,
}

impl From<&WorkflowInstance> for WorkflowReport {
    fn from(instance: &WorkflowInstance) -> Self {
        Self {
            workflow_id: instance.id,
            workflow_name: instance.workflow_name.clone(),
            current_state: instance.current_state.clone(),
            status: instance.status,
            priority: instance.priority,
            retry_count: instance.retry_count,
            metadata: instance.metadata.clone(),
            error: instance.error.clone(),
            created_at: instance.created_at,
            updated_at: instance.updated_at,
            completed_at: instance.completed_at,
            state_history: instance.history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::StateExecutionResult;
    use serde_json::json;

    #[test]
    fn test_stats_aggregation() {
        let mut done = WorkflowInstance::new("w", "a", WorkflowPriority::Normal, Metadata::new());
        done.record(StateExecutionResult::completed("a", json!({})));
        done.finish(WorkflowStatus::Completed, None);

        let mut slow = WorkflowInstance::new("w", "a", WorkflowPriority::Normal, Metadata::new());
        slow.record(StateExecutionResult::timed_out("a", "too slow"));
        slow.finish(WorkflowStatus::Timeout, None);

        let pending = WorkflowInstance::new("w", "a", WorkflowPriority::Low, Metadata::new());

        let stats = SystemStats::from_instances([&done, &slow, &pending]);
        assert_eq!(stats.total_workflows, 3);
        assert_eq!(stats.successful_workflows, 1);
        assert_eq!(stats.failed_workflows, 1);
        assert_eq!(stats.timed_out_workflows, 1);
        assert_eq!(stats.pending_workflows, 1);
        assert_eq!(stats.total_state_transitions, 2);
    }

    #[test]
    fn test_report_format_parsing() {
        assert_eq!("YAML".parse::<ReportFormat>(), Ok(ReportFormat::Yaml));
        assert_eq!("txt".parse::<ReportFormat>(), Ok(ReportFormat::Text));
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
