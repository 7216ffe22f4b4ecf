//! Workflow state-machine data models

use crate::models::predicate::Predicate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Open key/value metadata attached to definitions, runs and results
pub type Metadata = HashMap<String, Value>;

/// Upper bound for a single retry backoff delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(600);

/// Lifecycle status of a workflow run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not yet started
    Pending,
    /// Owned by a worker and executing
    Active,
    /// Reached the end of the state graph
    Completed,
    /// A state failed and exhausted its retries
    Failed,
    /// A state exceeded its timeout
    Timeout,
}

impl WorkflowStatus {
    /// Terminal statuses are final; no further execution occurs
    pub fn is_terminal(&self) -> bool {
        match self {
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Timeout => true,
            WorkflowStatus::Pending | WorkflowStatus::Active => false,
        }
    }
}

/// Outcome of a single state invocation attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Handler finished successfully
    Completed,
    /// Handler raised or reported failure
    Failed,
    /// Handler exceeded the state timeout
    Timeout,
}

/// How a transition is gated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Always eligible
    Automatic,
    /// Eligible only when its predicate holds
    Conditional,
}

/// Scheduling priority of a workflow run
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Immutable definition of a named state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateDefinition {
    /// Unique state name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Actions run before each handler invocation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_actions: Vec<String>,
    /// Actions run after the handler completes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_actions: Vec<String>,
    /// Maximum handler execution time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Number of failed attempts tolerated before the run fails
    #[serde(default)]
    pub retry_limit: u32,
    /// Delay before re-invoking a failed state, in milliseconds
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Multiplier applied to the delay on each further retry (1.0 = fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Resource tags the state needs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_resources: Vec<String>,
    /// States this state depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Additional context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

impl StateDefinition {
    /// Create a state with no timeout and no retries
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            entry_actions: Vec::new(),
            exit_actions: Vec::new(),
            timeout_ms: None,
            retry_limit: 0,
            retry_delay_ms: 0,
            backoff_multiplier: default_backoff_multiplier(),
            required_resources: Vec::new(),
            dependencies: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the retry limit and the fixed backoff delay between attempts
    pub fn with_retry(mut self, retry_limit: u32, retry_delay: Duration) -> Self {
        self.retry_limit = retry_limit;
        self.retry_delay_ms = retry_delay.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_entry_action(mut self, action: impl Into<String>) -> Self {
        self.entry_actions.push(action.into());
        self
    }

    pub fn with_exit_action(mut self, action: impl Into<String>) -> Self {
        self.exit_actions.push(action.into());
        self
    }

    pub fn with_dependency(mut self, state: impl Into<String>) -> Self {
        self.dependencies.push(state.into());
        self
    }

    pub fn with_resource(mut self, tag: impl Into<String>) -> Self {
        self.required_resources.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Handler timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Backoff before retry number `retry` (1-based).
    ///
    /// Fixed delay unless the multiplier exceeds 1.0, in which case the delay
    /// grows as `delay * multiplier^(retry - 1)`, capped at [`MAX_RETRY_DELAY`].
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let base = self.retry_delay_ms as f64;
        let delay_ms = if self.backoff_multiplier > 1.0 {
            base * self
                .backoff_multiplier
                .powi(retry.saturating_sub(1) as i32)
        } else {
            base
        };

        let cap = MAX_RETRY_DELAY.as_millis() as f64;
        Duration::from_millis(delay_ms.min(cap) as u64)
    }
}

/// Directed edge between two states
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionDefinition {
    /// Source state name
    pub from_state: String,
    /// Destination state name
    pub to_state: String,
    /// Gating kind
    pub kind: TransitionKind,
    /// Condition, required for conditional transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    /// Higher priorities are evaluated first
    #[serde(default)]
    pub priority: i32,
    /// Bound on the execution of this transition's actions, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Actions run when the transition is taken
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    /// Additional context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

impl TransitionDefinition {
    /// Unconditional transition
    pub fn automatic(from_state: impl Into<String>, to_state: impl Into<String>) -> Self {
        Self {
            from_state: from_state.into(),
            to_state: to_state.into(),
            kind: TransitionKind::Automatic,
            predicate: None,
            priority: 0,
            timeout_ms: None,
            actions: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Transition gated by `predicate`
    pub fn conditional(
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        predicate: Predicate,
    ) -> Self {
        Self {
            kind: TransitionKind::Conditional,
            predicate: Some(predicate),
            ..Self::automatic(from_state, to_state)
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Action timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Whether the transition may be taken given context variables
    pub fn is_satisfied(&self, variables: &Map<String, Value>) -> bool {
        match self.kind {
            TransitionKind::Automatic => true,
            TransitionKind::Conditional => self
                .predicate
                .as_ref()
                .map(|p| p.evaluate(variables))
                .unwrap_or(false),
        }
    }
}

/// Record of one state invocation attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateExecutionResult {
    /// State that was invoked
    pub state_name: String,
    /// Measured execution time in milliseconds
    pub duration_ms: u64,
    /// Attempt outcome
    pub status: StepStatus,
    /// Opaque handler output
    #[serde(default)]
    pub output: Value,
    /// Error description if the attempt did not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
}

impl StateExecutionResult {
    /// Successful result carrying `output`
    pub fn completed(state_name: impl Into<String>, output: Value) -> Self {
        Self {
            state_name: state_name.into(),
            duration_ms: 0,
            status: StepStatus::Completed,
            output,
            error: None,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    /// Failed result with an error description
    pub fn failed(state_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            error: Some(error.into()),
            ..Self::completed(state_name, Value::Null)
        }
    }

    /// Timed-out result
    pub fn timed_out(state_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Timeout,
            ..Self::failed(state_name, error)
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Runtime workflow run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowInstance {
    /// Unique run identifier
    pub id: Uuid,
    /// Name of the workflow
    pub workflow_name: String,
    /// Current/last state
    pub current_state: String,
    /// Overall run status
    pub status: WorkflowStatus,
    /// Scheduling priority
    pub priority: WorkflowPriority,
    /// Caller-supplied context
    #[serde(default)]
    pub metadata: Metadata,
    /// Failed attempts of the current state
    pub retry_count: u32,
    /// Every invocation attempt, in execution order
    #[serde(default)]
    pub history: Vec<StateExecutionResult>,
    /// Why the run ended FAILED or TIMEOUT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create a PENDING run positioned at `initial_state`
    pub fn new(
        workflow_name: impl Into<String>,
        initial_state: impl Into<String>,
        priority: WorkflowPriority,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow_name.into(),
            current_state: initial_state.into(),
            status: WorkflowStatus::Pending,
            priority,
            metadata,
            retry_count: 0,
            history: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Append an attempt record
    pub fn record(&mut self, result: StateExecutionResult) {
        self.history.push(result);
        self.touch();
    }

    /// Move to a terminal status
    pub fn finish(&mut self, status: WorkflowStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Snapshot handed to handlers, actions and predicates
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub current_state: String,
    pub priority: WorkflowPriority,
    pub retry_count: u32,
    pub metadata: Metadata,
    pub history: Vec<StateExecutionResult>,
    /// Metadata overlaid with the latest result's output fields
    pub variables: Map<String, Value>,
}

impl ExecutionContext {
    /// Build a context from a run snapshot
    pub fn from_instance(instance: &WorkflowInstance) -> Self {
        let mut variables: Map<String, Value> = instance
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(Value::Object(output)) = instance.history.last().map(|r| &r.output) {
            for (key, value) in output {
                variables.insert(key.clone(), value.clone());
            }
        }

        Self {
            workflow_id: instance.id,
            workflow_name: instance.workflow_name.clone(),
            current_state: instance.current_state.clone(),
            priority: instance.priority,
            retry_count: instance.retry_count,
            metadata: instance.metadata.clone(),
            history: instance.history.clone(),
            variables,
        }
    }

    /// Context with only the given variables, for standalone predicate queries
    pub fn with_variables(variables: Map<String, Value>) -> Self {
        Self {
            workflow_id: Uuid::nil(),
            workflow_name: String::new(),
            current_state: String::new(),
            priority: WorkflowPriority::default(),
            retry_count: 0,
            metadata: Metadata::new(),
            history: Vec::new(),
            variables,
        }
    }

    /// Look up a context variable
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_status_serialization() {
        let json = serde_json::to_string(&WorkflowStatus::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Active.is_terminal());
    }

    #[test]
    fn test_state_definition_builder() {
        let state = StateDefinition::new("fetch")
            .with_description("Fetch data")
            .with_timeout(Duration::from_millis(1500))
            .with_retry(3, Duration::from_millis(100))
            .with_entry_action("audit");

        assert_eq!(state.timeout_ms, Some(1500));
        assert_eq!(state.retry_limit, 3);
        assert_eq!(state.retry_delay_ms, 100);
        assert_eq!(state.entry_actions, vec!["audit".to_string()]);
    }

    #[test]
    fn test_retry_delay_fixed_and_exponential() {
        let fixed = StateDefinition::new("a").with_retry(3, Duration::from_millis(200));
        assert_eq!(fixed.retry_delay(1), Duration::from_millis(200));
        assert_eq!(fixed.retry_delay(3), Duration::from_millis(200));

        let exponential = fixed.clone().with_backoff_multiplier(2.0);
        assert_eq!(exponential.retry_delay(1), Duration::from_millis(200));
        assert_eq!(exponential.retry_delay(2), Duration::from_millis(400));
        assert_eq!(exponential.retry_delay(3), Duration::from_millis(800));

        let huge = StateDefinition::new("b")
            .with_retry(10, Duration::from_secs(100))
            .with_backoff_multiplier(10.0);
        assert_eq!(huge.retry_delay(5), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_state_definition_yaml_defaults() {
        let state: StateDefinition = serde_yaml::from_str("name: idle\n").unwrap();
        assert_eq!(state.name, "idle");
        assert_eq!(state.retry_limit, 0);
        assert_eq!(state.backoff_multiplier, 1.0);
        assert!(state.timeout().is_none());
    }

    #[test]
    fn test_transition_satisfaction() {
        let automatic = TransitionDefinition::automatic("a", "b");
        let conditional =
            TransitionDefinition::conditional("a", "c", Predicate::equals("status", "success"));

        let ok = json!({"status": "success"}).as_object().cloned().unwrap();
        let bad = json!({"status": "failure"}).as_object().cloned().unwrap();

        assert!(automatic.is_satisfied(&bad));
        assert!(conditional.is_satisfied(&ok));
        assert!(!conditional.is_satisfied(&bad));
    }

    #[test]
    fn test_context_overlays_latest_output() {
        let mut metadata = Metadata::new();
        metadata.insert("status".to_string(), json!("pending"));
        metadata.insert("owner".to_string(), json!("ops"));

        let mut instance =
            WorkflowInstance::new("deploy", "build", WorkflowPriority::High, metadata);
        instance.record(StateExecutionResult::completed(
            "build",
            json!({"status": "success"}),
        ));

        let ctx = ExecutionContext::from_instance(&instance);
        assert_eq!(ctx.variable("status"), Some(&json!("success")));
        assert_eq!(ctx.variable("owner"), Some(&json!("ops")));
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.priority, WorkflowPriority::High);
    }

    #[test]
    fn test_instance_finish() {
        let mut instance =
            WorkflowInstance::new("w", "a", WorkflowPriority::Normal, Metadata::new());
        assert_eq!(instance.status, WorkflowStatus::Pending);

        instance.finish(WorkflowStatus::Failed, Some("boom".to_string()));
        assert_eq!(instance.status, WorkflowStatus::Failed);
        assert!(instance.completed_at.is_some());
        assert_eq!(instance.error.as_deref(), Some("boom"));
    }
}
