//! Workflow run bookkeeping
//!
//! The manager owns the id → instance map. Once a run is ACTIVE the worker
//! executing it holds the authoritative copy and publishes snapshots through
//! [`WorkflowManager::commit`]; readers always receive clones.

use crate::models::workflow::{Metadata, WorkflowInstance, WorkflowPriority, WorkflowStatus};
use crate::services::logging::log_workflow_event;
use crate::workflow::registry::StateRegistry;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory store of workflow runs
pub struct WorkflowManager {
    states: Arc<StateRegistry>,
    instances: DashMap<Uuid, WorkflowInstance>,
}

impl WorkflowManager {
    /// Create a manager validating initial states against `states`
    pub fn new(states: Arc<StateRegistry>) -> Self {
        Self {
            states,
            instances: DashMap::new(),
        }
    }

    /// Create a PENDING run. Returns `None` if `initial_state` is not registered.
    pub fn create_workflow(
        &self,
        name: &str,
        initial_state: &str,
        priority: WorkflowPriority,
        metadata: Metadata,
    ) -> Option<Uuid> {
        if !self.states.contains(initial_state) {
            tracing::warn!(
                workflow = %name,
                state = %initial_state,
                "Cannot create workflow: initial state is not registered"
            );
            return None;
        }

        let instance = WorkflowInstance::new(name, initial_state, priority, metadata);
        let id = instance.id;
        self.instances.insert(id, instance);

        log_workflow_event("created", id, Some(name));
        Some(id)
    }

    /// Get a snapshot of a run
    pub fn get_workflow(&self, id: Uuid) -> Option<WorkflowInstance> {
        self.instances.get(&id).map(|entry| entry.value().clone())
    }

    /// List runs, optionally filtered by status, oldest first
    pub fn list_workflows(&self, status: Option<WorkflowStatus>) -> Vec<WorkflowInstance> {
        let mut runs: Vec<WorkflowInstance> = self
            .instances
            .iter()
            .filter(|entry| status.map_or(true, |s| entry.status == s))
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by_key(|run| run.created_at);
        runs
    }

    /// Move a PENDING run to ACTIVE and return the worker's copy.
    ///
    /// Returns `None` if the run is unknown or not PENDING.
    pub fn activate(&self, id: Uuid) -> Option<WorkflowInstance> {
        let mut entry = self.instances.get_mut(&id)?;
        if entry.status != WorkflowStatus::Pending {
            return None;
        }

        let now = Utc::now();
        entry.status = WorkflowStatus::Active;
        entry.started_at = Some(now);
        entry.updated_at = now;
        log_workflow_event("activated", id, Some(entry.workflow_name.as_str()));
        Some(entry.value().clone())
    }

    /// Publish a worker-owned snapshot. Terminal runs are never overwritten.
    pub fn commit(&self, instance: &WorkflowInstance) {
        if let Some(mut entry) = self.instances.get_mut(&instance.id) {
            if entry.status.is_terminal() {
                tracing::warn!(
                    workflow_id = %instance.id,
                    "Ignoring update to a finished workflow"
                );
                return;
            }
            *entry = instance.clone();
        }
    }

    /// Fail an ACTIVE run that no worker owns any more
    pub(crate) fn fail_orphaned(&self, id: Uuid, reason: &str) -> bool {
        match self.instances.get_mut(&id) {
            Some(mut entry) if entry.status == WorkflowStatus::Active => {
                entry.finish(WorkflowStatus::Failed, Some(reason.to_string()));
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every run
    pub fn snapshot(&self) -> Vec<WorkflowInstance> {
        self.list_workflows(None)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
