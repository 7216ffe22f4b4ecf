//! Handler traits and the per-name handler registry
//!
//! Handlers are business logic supplied by the embedding application. The
//! engine owns none of them; it only looks them up by state name (state
//! handlers) or action identifier (action handlers).

use crate::models::workflow::{ExecutionContext, StateExecutionResult};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Logic executed when a run enters a state
#[async_trait]
pub trait StateHandler: Send + Sync {
    /// Execute the state
    ///
    /// Returning `Err` or a result with `StepStatus::Failed` counts as a failed
    /// attempt and drives the retry policy. The engine records the measured
    /// duration and timestamp on the returned result.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<StateExecutionResult>;

    /// Whether the run may leave this state after a completed attempt
    fn can_transition(&self, _ctx: &ExecutionContext) -> bool {
        true
    }
}

/// Side effect bound to an action identifier
///
/// Actions run on state entry/exit and when a transition is taken.
#[async_trait]
pub trait TransitionHandler: Send + Sync {
    /// Whether the action should run for this context
    fn evaluate(&self, _ctx: &ExecutionContext) -> bool {
        true
    }

    /// Run the action
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Value>;
}

/// Registry of state and action handlers
#[derive(Default)]
pub struct HandlerRegistry {
    states: DashMap<String, Arc<dyn StateHandler>>,
    actions: DashMap<String, Arc<dyn TransitionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a state name, replacing any previous binding
    pub fn register_state(&self, state: impl Into<String>, handler: Arc<dyn StateHandler>) {
        let state = state.into();
        if self.states.insert(state.clone(), handler).is_some() {
            tracing::debug!(state = %state, "Replaced state handler");
        }
    }

    /// Bind an action handler to an identifier, replacing any previous binding
    pub fn register_action(&self, action: impl Into<String>, handler: Arc<dyn TransitionHandler>) {
        let action = action.into();
        if self.actions.insert(action.clone(), handler).is_some() {
            tracing::debug!(action = %action, "Replaced action handler");
        }
    }

    pub fn state_handler(&self, state: &str) -> Option<Arc<dyn StateHandler>> {
        self.states.get(state).map(|entry| entry.value().clone())
    }

    pub fn action_handler(&self, action: &str) -> Option<Arc<dyn TransitionHandler>> {
        self.actions.get(action).map(|entry| entry.value().clone())
    }

    pub fn has_state_handler(&self, state: &str) -> bool {
        self.states.contains_key(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{Metadata, WorkflowInstance, WorkflowPriority};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl StateHandler for Echo {
        async fn execute(&self, ctx: &ExecutionContext) -> Result<StateExecutionResult> {
            Ok(StateExecutionResult::completed(
                &ctx.current_state,
                json!({ "state": ctx.current_state }),
            ))
        }
    }

    struct Noop;

    #[async_trait]
    impl TransitionHandler for Noop {
        async fn execute(&self, _ctx: &ExecutionContext) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = HandlerRegistry::new();
        registry.register_state("start", Arc::new(Echo));
        registry.register_action("noop", Arc::new(Noop));

        assert!(registry.has_state_handler("start"));
        assert!(registry.state_handler("other").is_none());
        assert!(registry.action_handler("noop").is_some());

        let instance =
            WorkflowInstance::new("w", "start", WorkflowPriority::Normal, Metadata::new());
        let ctx = ExecutionContext::from_instance(&instance);
        let handler = registry.state_handler("start").unwrap();
        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result.output, json!({"state": "start"}));
        assert!(handler.can_transition(&ctx));
    }
}
