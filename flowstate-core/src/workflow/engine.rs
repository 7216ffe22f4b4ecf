//! State machine execution engine
//!
//! Every started run gets one worker task. A worker executes its run's states
//! strictly one at a time; across runs, steps execute in parallel bounded by a
//! counting semaphore of `max_concurrent_workflows` slots. A slot is held for
//! a single handler attempt (plus the actions around it), never across retry
//! backoff sleeps.

use crate::error::EngineError;
use crate::models::configuration::EngineConfig;
use crate::models::workflow::{
    ExecutionContext, StateDefinition, StateExecutionResult, StepStatus, TransitionDefinition,
    WorkflowInstance, WorkflowStatus,
};
use crate::workflow::handler::{HandlerRegistry, StateHandler};
use crate::workflow::manager::WorkflowManager;
use crate::workflow::registry::{StateRegistry, TransitionRegistry};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

/// Outgoing transitions of `state` that may be taken in `ctx`, priority descending
pub fn select_transitions(
    transitions: &TransitionRegistry,
    state: &str,
    ctx: &ExecutionContext,
) -> Vec<TransitionDefinition> {
    transitions
        .get_transitions(state)
        .into_iter()
        .filter(|t| t.is_satisfied(&ctx.variables))
        .collect()
}

/// Drives workflow runs through their states
pub struct ExecutionEngine {
    states: Arc<StateRegistry>,
    transitions: Arc<TransitionRegistry>,
    handlers: Arc<HandlerRegistry>,
    manager: Arc<WorkflowManager>,
    /// Bounded worker pool
    pool: Arc<Semaphore>,
    capacity: usize,
    /// `true` while steps may be scheduled
    gate: watch::Sender<bool>,
    /// Worker task per started run
    workers: DashMap<Uuid, JoinHandle<()>>,
    default_timeout: Option<Duration>,
}

impl ExecutionEngine {
    pub fn new(
        states: Arc<StateRegistry>,
        transitions: Arc<TransitionRegistry>,
        handlers: Arc<HandlerRegistry>,
        manager: Arc<WorkflowManager>,
        config: &EngineConfig,
    ) -> Self {
        let capacity = config.max_concurrent_workflows.max(1);
        let (gate, _) = watch::channel(true);

        Self {
            states,
            transitions,
            handlers,
            manager,
            pool: Arc::new(Semaphore::new(capacity)),
            capacity,
            gate,
            workers: DashMap::new(),
            default_timeout: config.default_state_timeout(),
        }
    }

    /// Start a PENDING run on its own worker.
    ///
    /// Returns false if the run is unknown or was already started.
    pub async fn start_workflow(&self, id: Uuid) -> bool {
        let Some(instance) = self.manager.activate(id) else {
            tracing::warn!(workflow_id = %id, "Cannot start workflow: unknown or not pending");
            return false;
        };
        self.reap_finished_workers();

        let worker = RunWorker {
            states: self.states.clone(),
            transitions: self.transitions.clone(),
            handlers: self.handlers.clone(),
            manager: self.manager.clone(),
            pool: self.pool.clone(),
            gate: self.gate.subscribe(),
            default_timeout: self.default_timeout,
        };

        let manager = self.manager.clone();
        let handle = tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(worker.run(instance)).catch_unwind().await {
                let reason = format!("Workflow worker panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(workflow_id = %id, "{}", reason);
                manager.fail_orphaned(id, &reason);
            }
        });
        self.workers.insert(id, handle);

        tracing::info!(
            workflow_id = %id,
            running_workers = self.running_workers(),
            "Workflow scheduled"
        );
        true
    }

    /// Wait for a run's worker to finish and return the final snapshot
    pub async fn wait_for_completion(&self, id: Uuid) -> Option<WorkflowInstance> {
        if let Some((_id, handle)) = self.workers.remove(&id) {
            if let Err(e) = handle.await {
                tracing::error!(workflow_id = %id, error = %e, "Workflow worker aborted");
                self.manager
                    .fail_orphaned(id, &format!("Workflow worker aborted: {}", e));
            }
        }
        self.manager.get_workflow(id)
    }

    /// Transitions of `state` available in `ctx`
    pub fn get_available_transitions(
        &self,
        state: &str,
        ctx: &ExecutionContext,
    ) -> Vec<TransitionDefinition> {
        select_transitions(&self.transitions, state, ctx)
    }

    /// Stop scheduling new steps; in-flight steps finish normally
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Resume scheduling steps
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        !*self.gate.borrow()
    }

    /// Wait until no step is executing, up to `grace`. Returns false on expiry.
    pub async fn drain(&self, grace: Duration) -> bool {
        match timeout(grace, self.pool.acquire_many(self.capacity as u32)).await {
            Ok(Ok(permits)) => {
                drop(permits);
                true
            }
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(
                    in_flight = self.in_flight(),
                    grace_ms = grace.as_millis() as u64,
                    "Grace period expired with steps still executing"
                );
                false
            }
        }
    }

    /// Number of steps currently executing
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.pool.available_permits())
    }

    /// Pool capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of workers that have not finished yet
    pub fn running_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Drop finished worker handles and fail runs left ACTIVE without a worker.
    ///
    /// Returns the ids of the runs that were failed.
    pub fn reap_finished_workers(&self) -> Vec<Uuid> {
        let finished: Vec<Uuid> = self
            .workers
            .iter()
            .filter(|entry| entry.value().is_finished())
            .map(|entry| *entry.key())
            .collect();

        let mut orphaned = Vec::new();
        for id in finished {
            self.workers.remove(&id);
            if self
                .manager
                .fail_orphaned(id, "Workflow worker exited without finishing the run")
            {
                tracing::error!(workflow_id = %id, "Marked orphaned workflow as failed");
                orphaned.push(id);
            }
        }
        orphaned
    }
}

enum StepOutcome {
    /// Re-invoke the same state after the delay
    Retry(Duration),
    /// Moved to the next state
    Advance,
    /// Run reached a terminal status
    Finished,
}

/// Owns one run for the duration of its execution
struct RunWorker {
    states: Arc<StateRegistry>,
    transitions: Arc<TransitionRegistry>,
    handlers: Arc<HandlerRegistry>,
    manager: Arc<WorkflowManager>,
    pool: Arc<Semaphore>,
    gate: watch::Receiver<bool>,
    default_timeout: Option<Duration>,
}

impl RunWorker {
    async fn run(mut self, mut instance: WorkflowInstance) {
        tracing::info!(
            workflow_id = %instance.id,
            workflow = %instance.workflow_name,
            state = %instance.current_state,
            "Workflow started"
        );

        loop {
            let Some(slot) = self.acquire_slot().await else {
                instance.finish(
                    WorkflowStatus::Failed,
                    Some("Engine shut down before the run finished".to_string()),
                );
                self.manager.commit(&instance);
                break;
            };

            let outcome = self.step(&mut instance).await;
            drop(slot);
            self.manager.commit(&instance);

            match outcome {
                StepOutcome::Retry(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                StepOutcome::Advance => {}
                StepOutcome::Finished => break,
            }
        }

        tracing::info!(
            workflow_id = %instance.id,
            state = %instance.current_state,
            status = ?instance.status,
            steps = instance.history.len(),
            "Workflow finished"
        );
    }

    /// Wait for the gate to open and a pool slot to free up
    async fn acquire_slot(&mut self) -> Option<OwnedSemaphorePermit> {
        loop {
            if self.gate.wait_for(|open| *open).await.is_err() {
                return None;
            }

            let permit = self.pool.clone().acquire_owned().await.ok()?;
            if *self.gate.borrow() {
                return Some(permit);
            }
            // Paused while waiting for the slot
            drop(permit);
        }
    }

    /// Execute one attempt of the current state
    async fn step(&self, instance: &mut WorkflowInstance) -> StepOutcome {
        let state_name = instance.current_state.clone();

        let Some(state) = self.states.get_state(&state_name) else {
            return fail(instance, EngineError::StateNotFound(state_name).to_string());
        };
        let Some(handler) = self.handlers.state_handler(&state_name) else {
            return fail(instance, EngineError::HandlerNotFound(state_name).to_string());
        };

        let limit = state.timeout().or(self.default_timeout);
        let ctx = ExecutionContext::from_instance(instance);
        self.run_actions(&state.entry_actions, &ctx, limit).await;

        let attempt = instance.retry_count + 1;
        let mut result = self.invoke(&state, handler.as_ref(), &ctx, limit).await;
        result.metadata.insert("attempt".to_string(), json!(attempt));
        let status = result.status;
        let error = result.error.clone();
        instance.record(result);
        self.manager.commit(instance);

        match status {
            StepStatus::Timeout => {
                tracing::warn!(
                    workflow_id = %instance.id,
                    state = %state_name,
                    "State timed out"
                );
                instance.finish(WorkflowStatus::Timeout, error);
                StepOutcome::Finished
            }
            StepStatus::Failed => {
                instance.retry_count += 1;
                if instance.retry_count < state.retry_limit {
                    let delay = state.retry_delay(instance.retry_count);
                    tracing::info!(
                        workflow_id = %instance.id,
                        state = %state_name,
                        retry = instance.retry_count,
                        retry_limit = state.retry_limit,
                        delay_ms = delay.as_millis() as u64,
                        error = error.as_deref().unwrap_or(""),
                        "Retrying state"
                    );
                    instance.touch();
                    StepOutcome::Retry(delay)
                } else {
                    tracing::warn!(
                        workflow_id = %instance.id,
                        state = %state_name,
                        attempts = instance.retry_count,
                        "Retry limit reached"
                    );
                    let reason = format!(
                        "State '{}' failed after {} attempt(s): {}",
                        state_name,
                        instance.retry_count,
                        error.unwrap_or_default()
                    );
                    instance.finish(WorkflowStatus::Failed, Some(reason));
                    StepOutcome::Finished
                }
            }
            StepStatus::Completed => {
                instance.retry_count = 0;
                let ctx = ExecutionContext::from_instance(instance);
                self.run_actions(&state.exit_actions, &ctx, limit).await;

                let may_leave =
                    match panic::catch_unwind(AssertUnwindSafe(|| handler.can_transition(&ctx))) {
                        Ok(may_leave) => may_leave,
                        Err(panic) => {
                            let reason = EngineError::HandlerExecutionFailure {
                                state: state_name,
                                message: format!(
                                    "can_transition panicked: {}",
                                    panic_message(panic.as_ref())
                                ),
                            };
                            return fail(instance, reason.to_string());
                        }
                    };

                if !may_leave {
                    tracing::info!(
                        workflow_id = %instance.id,
                        state = %state_name,
                        "Handler ended the workflow in its current state"
                    );
                    instance.finish(WorkflowStatus::Completed, None);
                    return StepOutcome::Finished;
                }

                self.advance(instance, &ctx).await
            }
        }
    }

    /// Call the handler bounded by `limit`, containing errors and panics
    async fn invoke(
        &self,
        state: &StateDefinition,
        handler: &dyn StateHandler,
        ctx: &ExecutionContext,
        limit: Option<Duration>,
    ) -> StateExecutionResult {
        let started = Instant::now();
        let invocation = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();

        let outcome = match limit {
            Some(limit) => timeout(limit, invocation).await.ok(),
            None => Some(invocation.await),
        };

        let mut result = match outcome {
            None => StateExecutionResult::timed_out(
                &state.name,
                EngineError::StateTimeout {
                    state: state.name.clone(),
                    timeout_ms: limit.map(|l| l.as_millis() as u64).unwrap_or_default(),
                }
                .to_string(),
            ),
            Some(Ok(Ok(result))) => result,
            Some(Ok(Err(e))) => StateExecutionResult::failed(
                &state.name,
                EngineError::HandlerExecutionFailure {
                    state: state.name.clone(),
                    message: format!("{:#}", e),
                }
                .to_string(),
            ),
            Some(Err(panic)) => StateExecutionResult::failed(
                &state.name,
                EngineError::HandlerExecutionFailure {
                    state: state.name.clone(),
                    message: format!("handler panicked: {}", panic_message(panic.as_ref())),
                }
                .to_string(),
            ),
        };

        result.state_name = state.name.clone();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.timestamp = Utc::now();
        if result.status == StepStatus::Failed && result.error.is_none() {
            result.error = Some(format!("State '{}' reported failure", state.name));
        }
        result
    }

    /// Select and take the next transition
    async fn advance(&self, instance: &mut WorkflowInstance, ctx: &ExecutionContext) -> StepOutcome {
        let from = instance.current_state.clone();
        if !self.transitions.has_outgoing(&from) {
            tracing::info!(workflow_id = %instance.id, state = %from, "Reached final state");
            instance.finish(WorkflowStatus::Completed, None);
            return StepOutcome::Finished;
        }

        let Some(transition) = select_transitions(&self.transitions, &from, ctx)
            .into_iter()
            .next()
        else {
            return fail(
                instance,
                format!("No transition from state '{}' matched the run context", from),
            );
        };

        self.run_actions(&transition.actions, ctx, transition.timeout())
            .await;

        tracing::info!(
            workflow_id = %instance.id,
            from = %from,
            to = %transition.to_state,
            kind = ?transition.kind,
            "Workflow transitioned"
        );

        instance.current_state = transition.to_state;
        instance.retry_count = 0;
        instance.touch();
        StepOutcome::Advance
    }

    /// Run actions in order. Failures are logged and never fail the run.
    async fn run_actions(&self, actions: &[String], ctx: &ExecutionContext, limit: Option<Duration>) {
        for id in actions {
            let Some(action) = self.handlers.action_handler(id) else {
                tracing::warn!(action = %id, state = %ctx.current_state, "Unknown action");
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| action.evaluate(ctx))) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(action = %id, "Action skipped by its guard");
                    continue;
                }
                Err(panic) => {
                    tracing::warn!(
                        action = %id,
                        panic = %panic_message(panic.as_ref()),
                        "Action guard panicked; skipping action"
                    );
                    continue;
                }
            }

            let execution = AssertUnwindSafe(action.execute(ctx)).catch_unwind();
            let outcome = match limit {
                Some(limit) => match timeout(limit, execution).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(action = %id, "Action timed out");
                        continue;
                    }
                },
                None => execution.await,
            };

            match outcome {
                Ok(Ok(_)) => tracing::debug!(action = %id, "Action executed"),
                Ok(Err(e)) => tracing::warn!(action = %id, error = %e, "Action failed"),
                Err(panic) => tracing::warn!(
                    action = %id,
                    panic = %panic_message(panic.as_ref()),
                    "Action panicked"
                ),
            }
        }
    }
}

fn fail(instance: &mut WorkflowInstance, reason: String) -> StepOutcome {
    tracing::error!(workflow_id = %instance.id, state = %instance.current_state, "{}", reason);
    instance.finish(WorkflowStatus::Failed, Some(reason));
    StepOutcome::Finished
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::predicate::Predicate;
    use crate::models::workflow::{Metadata, StateDefinition, WorkflowPriority};
    use crate::workflow::handler::TransitionHandler;
    use crate::workflow::handlers::{FnHandler, StaticHandler};
    use serde_json::Value;

    struct Fixture {
        states: Arc<StateRegistry>,
        transitions: Arc<TransitionRegistry>,
        handlers: Arc<HandlerRegistry>,
        manager: Arc<WorkflowManager>,
        engine: ExecutionEngine,
    }

    fn fixture() -> Fixture {
        let states = Arc::new(StateRegistry::new());
        let transitions = Arc::new(TransitionRegistry::new(states.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let manager = Arc::new(WorkflowManager::new(states.clone()));
        let engine = ExecutionEngine::new(
            states.clone(),
            transitions.clone(),
            handlers.clone(),
            manager.clone(),
            &EngineConfig::default(),
        );
        Fixture {
            states,
            transitions,
            handlers,
            manager,
            engine,
        }
    }

    fn create(f: &Fixture, state: &str) -> Uuid {
        f.manager
            .create_workflow("test", state, WorkflowPriority::Normal, Metadata::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_workflow_completes() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.states.add_state(StateDefinition::new("b"));
        f.transitions
            .add_transition(TransitionDefinition::automatic("a", "b"));
        f.handlers
            .register_state("a", Arc::new(StaticHandler::completed(json!({"n": 1}))));
        f.handlers
            .register_state("b", Arc::new(StaticHandler::completed(json!({"n": 2}))));

        let id = create(&f, "a");
        assert!(f.engine.start_workflow(id).await);

        let run = f.engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Completed);
        assert_eq!(run.current_state, "b");
        assert_eq!(run.history.len(), 2);
        assert_eq!(run.history[0].metadata["attempt"], json!(1));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.handlers
            .register_state("a", Arc::new(StaticHandler::completed(Value::Null)));

        let id = create(&f, "a");
        assert!(f.engine.start_workflow(id).await);
        assert!(!f.engine.start_workflow(id).await);
        f.engine.wait_for_completion(id).await;
        assert!(!f.engine.start_workflow(id).await);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_run() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));

        let id = create(&f, "a");
        assert!(f.engine.start_workflow(id).await);

        let run = f.engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert!(run.error.unwrap().contains("No handler"));
        assert!(run.history.is_empty());
    }

    #[tokio::test]
    async fn test_missing_destination_state_fails_run() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.transitions
            .add_transition(TransitionDefinition::automatic("a", "ghost"));
        f.handlers
            .register_state("a", Arc::new(StaticHandler::completed(Value::Null)));

        let id = create(&f, "a");
        f.engine.start_workflow(id).await;

        let run = f.engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(run.current_state, "ghost");
    }

    #[tokio::test]
    async fn test_unmatched_transitions_fail_run() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.states.add_state(StateDefinition::new("b"));
        f.transitions.add_transition(TransitionDefinition::conditional(
            "a",
            "b",
            Predicate::equals("go", true),
        ));
        f.handlers
            .register_state("a", Arc::new(StaticHandler::completed(json!({"go": false}))));

        let id = create(&f, "a");
        f.engine.start_workflow(id).await;

        let run = f.engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(run.current_state, "a");
        assert!(run.error.unwrap().contains("No transition"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.handlers.register_state(
            "a",
            Arc::new(FnHandler::new(|_| -> anyhow::Result<Value> {
                panic!("handler exploded")
            })),
        );

        let id = create(&f, "a");
        f.engine.start_workflow(id).await;

        let run = f.engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(run.history.len(), 1);
        assert_eq!(run.history[0].status, StepStatus::Failed);
        assert!(run.history[0]
            .error
            .as_deref()
            .unwrap()
            .contains("handler exploded"));
        assert!(f.engine.reap_finished_workers().is_empty());
    }

    #[tokio::test]
    async fn test_can_transition_false_completes_in_place() {
        struct Stay;

        #[async_trait::async_trait]
        impl StateHandler for Stay {
            async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<StateExecutionResult> {
                Ok(StateExecutionResult::completed(&ctx.current_state, Value::Null))
            }

            fn can_transition(&self, _ctx: &ExecutionContext) -> bool {
                false
            }
        }

        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.states.add_state(StateDefinition::new("b"));
        f.transitions
            .add_transition(TransitionDefinition::automatic("a", "b"));
        f.handlers.register_state("a", Arc::new(Stay));

        let id = create(&f, "a");
        f.engine.start_workflow(id).await;

        let run = f.engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Completed);
        assert_eq!(run.current_state, "a");
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let states = Arc::new(StateRegistry::new());
        let transitions = Arc::new(TransitionRegistry::new(states.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let manager = Arc::new(WorkflowManager::new(states.clone()));
        let config = EngineConfig {
            default_state_timeout_ms: Some(20),
            ..EngineConfig::default()
        };
        let engine = ExecutionEngine::new(
            states.clone(),
            transitions,
            handlers.clone(),
            manager.clone(),
            &config,
        );

        struct Slow;

        #[async_trait::async_trait]
        impl StateHandler for Slow {
            async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<StateExecutionResult> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(StateExecutionResult::completed(&ctx.current_state, Value::Null))
            }
        }

        states.add_state(StateDefinition::new("slow"));
        handlers.register_state("slow", Arc::new(Slow));
        let id = manager
            .create_workflow("t", "slow", WorkflowPriority::Normal, Metadata::new())
            .unwrap();
        engine.start_workflow(id).await;

        let run = engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Timeout);
        assert_eq!(run.history[0].status, StepStatus::Timeout);
    }

    #[tokio::test]
    async fn test_pause_and_drain() {
        let f = fixture();
        assert!(!f.engine.is_paused());
        f.engine.pause();
        assert!(f.engine.is_paused());
        assert!(f.engine.drain(Duration::from_millis(50)).await);
        assert_eq!(f.engine.in_flight(), 0);
        f.engine.resume();
        assert!(!f.engine.is_paused());
    }

    #[tokio::test]
    async fn test_get_available_transitions_is_pure() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("b"));
        f.states.add_state(StateDefinition::new("c"));
        f.transitions.add_transition(TransitionDefinition::conditional(
            "b",
            "c",
            Predicate::equals("status", "success"),
        ));

        let success = ExecutionContext::with_variables(
            json!({"status": "success"}).as_object().cloned().unwrap(),
        );
        let failure = ExecutionContext::with_variables(
            json!({"status": "failure"}).as_object().cloned().unwrap(),
        );

        assert_eq!(f.engine.get_available_transitions("b", &success).len(), 1);
        assert!(f.engine.get_available_transitions("b", &failure).is_empty());
        assert!(f.manager.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_can_transition_fails_run_and_keeps_history() {
        struct Undecided;

        #[async_trait::async_trait]
        impl StateHandler for Undecided {
            async fn execute(&self, ctx: &ExecutionContext) -> anyhow::Result<StateExecutionResult> {
                Ok(StateExecutionResult::completed(&ctx.current_state, json!({"done": true})))
            }

            fn can_transition(&self, _ctx: &ExecutionContext) -> bool {
                panic!("cannot decide")
            }
        }

        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.states.add_state(StateDefinition::new("b"));
        f.transitions
            .add_transition(TransitionDefinition::automatic("a", "b"));
        f.handlers.register_state("a", Arc::new(Undecided));

        let id = create(&f, "a");
        assert!(f.engine.start_workflow(id).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Failed by the worker itself, before anyone waits on it
        let run = f.manager.get_workflow(id).unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(run.current_state, "a");
        assert_eq!(run.history.len(), 1);
        assert_eq!(run.history[0].status, StepStatus::Completed);
        assert!(run.error.unwrap().contains("can_transition panicked: cannot decide"));
    }

    #[tokio::test]
    async fn test_panicking_action_guard_skips_action() {
        struct BrokenGuard {
            ran: Arc<std::sync::atomic::AtomicBool>,
        }

        #[async_trait::async_trait]
        impl TransitionHandler for BrokenGuard {
            fn evaluate(&self, _ctx: &ExecutionContext) -> bool {
                panic!("guard exploded")
            }

            async fn execute(&self, _ctx: &ExecutionContext) -> anyhow::Result<Value> {
                self.ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let f = fixture();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        f.states
            .add_state(StateDefinition::new("a").with_entry_action("guarded"));
        f.handlers
            .register_state("a", Arc::new(StaticHandler::completed(Value::Null)));
        f.handlers
            .register_action("guarded", Arc::new(BrokenGuard { ran: ran.clone() }));

        let id = create(&f, "a");
        assert!(f.engine.start_workflow(id).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let run = f.manager.get_workflow(id).unwrap();
        assert_eq!(run.status, WorkflowStatus::Completed);
        assert_eq!(run.history.len(), 1);
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hung_entry_and_exit_actions_are_bounded() {
        struct Hang;

        #[async_trait::async_trait]
        impl TransitionHandler for Hang {
            async fn execute(&self, _ctx: &ExecutionContext) -> anyhow::Result<Value> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
        }

        let f = fixture();
        f.states.add_state(
            StateDefinition::new("a")
                .with_timeout(Duration::from_millis(50))
                .with_entry_action("hang")
                .with_exit_action("hang"),
        );
        f.handlers
            .register_state("a", Arc::new(StaticHandler::completed(Value::Null)));
        f.handlers.register_action("hang", Arc::new(Hang));

        let id = create(&f, "a");
        let started = Instant::now();
        f.engine.start_workflow(id).await;

        let run = f.engine.wait_for_completion(id).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Completed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(f.engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_finished_workers_are_reaped_on_start() {
        let f = fixture();
        f.states.add_state(StateDefinition::new("a"));
        f.handlers
            .register_state("a", Arc::new(StaticHandler::completed(Value::Null)));

        let first = create(&f, "a");
        f.engine.start_workflow(first).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            f.manager.get_workflow(first).unwrap().status,
            WorkflowStatus::Completed
        );

        let second = create(&f, "a");
        f.engine.start_workflow(second).await;
        assert_eq!(f.engine.workers.len(), 1);
        assert!(f.engine.workers.contains_key(&second));

        // A reaped run can still be waited on
        let run = f.engine.wait_for_completion(first).await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Completed);
        f.engine.wait_for_completion(second).await;
    }
}
