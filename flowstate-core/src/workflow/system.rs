//! Workflow system facade
//!
//! [`WorkflowSystem`] owns every engine component and exposes the external
//! operations. Construct one per engine; nothing is global.

use crate::models::configuration::EngineConfig;
use crate::models::report::{ReportFormat, SystemStats, WorkflowReport};
use crate::models::workflow::{
    ExecutionContext, Metadata, StateDefinition, TransitionDefinition, WorkflowInstance,
    WorkflowPriority, WorkflowStatus,
};
use crate::workflow::engine::ExecutionEngine;
use crate::workflow::handler::{HandlerRegistry, StateHandler, TransitionHandler};
use crate::workflow::manager::WorkflowManager;
use crate::workflow::monitor::MonitoringLoop;
use crate::workflow::registry::{StateRegistry, TransitionRegistry};
use crate::workflow::reporting::{render_system_stats, render_workflow_report};
use crate::workflow::validator::{DefinitionValidator, ValidationResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// The workflow state-machine engine
pub struct WorkflowSystem {
    config: EngineConfig,
    states: Arc<StateRegistry>,
    transitions: Arc<TransitionRegistry>,
    handlers: Arc<HandlerRegistry>,
    manager: Arc<WorkflowManager>,
    engine: Arc<ExecutionEngine>,
    monitor: MonitoringLoop,
    running: AtomicBool,
    entry_points: RwLock<Vec<String>>,
}

impl Default for WorkflowSystem {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl WorkflowSystem {
    pub fn new(config: EngineConfig) -> Self {
        let states = Arc::new(StateRegistry::new());
        let transitions = Arc::new(TransitionRegistry::new(states.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let manager = Arc::new(WorkflowManager::new(states.clone()));
        let engine = Arc::new(ExecutionEngine::new(
            states.clone(),
            transitions.clone(),
            handlers.clone(),
            manager.clone(),
            &config,
        ));
        let monitor = MonitoringLoop::new(manager.clone(), engine.clone(), config.monitoring_interval());

        tracing::debug!(
            max_concurrent_workflows = engine.capacity(),
            monitoring_interval_ms = config.monitoring_interval_ms,
            "Workflow system created"
        );

        Self {
            config,
            states,
            transitions,
            handlers,
            manager,
            engine,
            monitor,
            running: AtomicBool::new(false),
            entry_points: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a state. Returns false if the name is taken.
    pub fn add_state(&self, definition: StateDefinition) -> bool {
        self.states.add_state(definition)
    }

    pub fn get_state(&self, name: &str) -> Option<StateDefinition> {
        self.states.get_state(name)
    }

    /// State names in registration order
    pub fn list_states(&self) -> Vec<String> {
        self.states.list_states()
    }

    /// Register a transition. Returns false if the definition is invalid.
    pub fn add_transition(&self, definition: TransitionDefinition) -> bool {
        self.transitions.add_transition(definition)
    }

    /// Outgoing transitions of `state`, highest priority first
    pub fn get_transitions(&self, state: &str) -> Vec<TransitionDefinition> {
        self.transitions.get_transitions(state)
    }

    /// Outgoing transitions of `state` that may be taken in `ctx`
    pub fn get_available_transitions(
        &self,
        state: &str,
        ctx: &ExecutionContext,
    ) -> Vec<TransitionDefinition> {
        self.engine.get_available_transitions(state, ctx)
    }

    /// Bind the handler executed when a run enters `state`
    pub fn register_handler(&self, state: impl Into<String>, handler: Arc<dyn StateHandler>) {
        self.handlers.register_state(state, handler);
    }

    /// Bind an action identifier used in entry/exit/transition action lists
    pub fn register_action(&self, action: impl Into<String>, handler: Arc<dyn TransitionHandler>) {
        self.handlers.register_action(action, handler);
    }

    /// Mark `state` as a place where runs begin (used for reachability checks)
    pub fn declare_entry_point(&self, state: impl Into<String>) {
        let state = state.into();
        let mut entry_points = self
            .entry_points
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !entry_points.contains(&state) {
            entry_points.push(state);
        }
    }

    /// Check the registered graph for errors and warnings
    pub fn validate(&self) -> ValidationResult {
        let entry_points = self
            .entry_points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        DefinitionValidator::new(&self.states, &self.transitions, &self.handlers)
            .validate(&entry_points)
    }

    /// Create a PENDING run. Returns `None` if `initial_state` is not registered.
    pub fn create_workflow(
        &self,
        name: &str,
        initial_state: &str,
        priority: WorkflowPriority,
        metadata: Metadata,
    ) -> Option<Uuid> {
        self.manager
            .create_workflow(name, initial_state, priority, metadata)
    }

    /// Start a PENDING run. Returns false if unknown or already started.
    pub async fn start_workflow(&self, id: Uuid) -> bool {
        self.engine.start_workflow(id).await
    }

    pub fn get_workflow(&self, id: Uuid) -> Option<WorkflowInstance> {
        self.manager.get_workflow(id)
    }

    /// Runs ordered by creation time, optionally filtered by status
    pub fn list_workflows(&self, status: Option<WorkflowStatus>) -> Vec<WorkflowInstance> {
        self.manager.list_workflows(status)
    }

    /// Wait for a started run to finish and return its final snapshot
    pub async fn wait_for_completion(&self, id: Uuid) -> Option<WorkflowInstance> {
        self.engine.wait_for_completion(id).await
    }

    /// Context a handler would currently see for a run
    pub fn build_context(&self, id: Uuid) -> Option<ExecutionContext> {
        self.manager
            .get_workflow(id)
            .map(|instance| ExecutionContext::from_instance(&instance))
    }

    /// Aggregate counters over every run, computed now
    pub fn get_system_stats(&self) -> SystemStats {
        SystemStats::from_instances(self.manager.snapshot().iter())
    }

    /// Statistics from the most recent monitoring cycle
    pub fn latest_monitored_stats(&self) -> Option<SystemStats> {
        self.monitor.latest_stats()
    }

    /// Render one run. Returns `None` for an unknown id.
    pub fn export_workflow_report(&self, id: Uuid, format: ReportFormat) -> Option<String> {
        let instance = self.manager.get_workflow(id)?;
        match render_workflow_report(&WorkflowReport::from(&instance), format) {
            Ok(rendered) => Some(rendered),
            Err(e) => {
                tracing::error!(workflow_id = %id, error = %e, "Failed to export workflow report");
                None
            }
        }
    }

    /// Render the current statistics
    pub fn export_system_stats(&self, format: ReportFormat) -> Option<String> {
        match render_system_stats(&self.get_system_stats(), format) {
            Ok(rendered) => Some(rendered),
            Err(e) => {
                tracing::error!(error = %e, "Failed to export system statistics");
                None
            }
        }
    }

    /// Resume step scheduling and start the monitoring loop
    pub async fn start_system(&self) -> bool {
        self.engine.resume();
        if !self.monitor.is_running() {
            self.monitor.start();
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!(
                max_concurrent_workflows = self.engine.capacity(),
                "Workflow system started"
            );
        }
        true
    }

    /// Pause step scheduling, stop the monitoring loop and drain in-flight steps
    pub async fn stop_system(&self) -> bool {
        self.engine.pause();
        self.monitor.stop().await;

        let drained = self.engine.drain(self.config.shutdown_grace()).await;
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!(drained, "Workflow system stopped");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }
}
