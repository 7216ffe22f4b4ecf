//! Background monitoring loop
//!
//! Periodically recomputes system statistics and fails runs that are still
//! ACTIVE although their worker task is gone.

use crate::error::{EngineError, EngineResult};
use crate::models::report::SystemStats;
use crate::workflow::engine::ExecutionEngine;
use crate::workflow::manager::WorkflowManager;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Supervisor task recomputing statistics on a fixed interval
pub struct MonitoringLoop {
    manager: Arc<WorkflowManager>,
    engine: Arc<ExecutionEngine>,
    period: Duration,
    latest: Arc<RwLock<Option<SystemStats>>>,
    running: Mutex<Option<Running>>,
}

impl MonitoringLoop {
    pub fn new(manager: Arc<WorkflowManager>, engine: Arc<ExecutionEngine>, period: Duration) -> Self {
        Self {
            manager,
            engine,
            period,
            latest: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop. Returns false if it is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let manager = self.manager.clone();
        let engine = self.engine.clone();
        let latest = self.latest.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            tracing::info!(interval_ms = period.as_millis() as u64, "Monitoring loop started");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match run_cycle(&manager, &engine) {
                            Ok(stats) => {
                                *latest.write().unwrap_or_else(PoisonError::into_inner) = Some(stats);
                            }
                            Err(e) => tracing::error!(error = %e, "Monitoring cycle failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Monitoring loop stopped");
        });

        *running = Some(Running { shutdown, handle });
        true
    }

    /// Signal the loop to stop and wait for it. Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(Running { shutdown, handle }) = running else {
            return false;
        };

        shutdown.send_replace(true);
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Monitoring task aborted");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Statistics computed by the most recent cycle
    pub fn latest_stats(&self) -> Option<SystemStats> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one cycle immediately, outside the timer
    pub fn run_once(&self) -> EngineResult<SystemStats> {
        let stats = run_cycle(&self.manager, &self.engine)?;
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(stats.clone());
        Ok(stats)
    }
}

fn run_cycle(manager: &WorkflowManager, engine: &ExecutionEngine) -> EngineResult<SystemStats> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let orphaned = engine.reap_finished_workers();
        let stats = SystemStats::from_instances(manager.snapshot().iter());

        tracing::debug!(
            total = stats.total_workflows,
            pending = stats.pending_workflows,
            active = stats.active_workflows,
            completed = stats.successful_workflows,
            failed = stats.failed_workflows,
            timed_out = stats.timed_out_workflows,
            transitions = stats.total_state_transitions,
            in_flight = engine.in_flight(),
            workers = engine.running_workers(),
            orphaned = orphaned.len(),
            "Monitoring cycle"
        );

        stats
    }))
    .map_err(|_| EngineError::MonitoringCycleError("statistics computation panicked".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::configuration::EngineConfig;
    use crate::models::workflow::{Metadata, StateDefinition, WorkflowPriority};
    use crate::workflow::handler::HandlerRegistry;
    use crate::workflow::registry::{StateRegistry, TransitionRegistry};

    fn monitor(period: Duration) -> (Arc<WorkflowManager>, MonitoringLoop) {
        let states = Arc::new(StateRegistry::new());
        states.add_state(StateDefinition::new("start"));
        let transitions = Arc::new(TransitionRegistry::new(states.clone()));
        let manager = Arc::new(WorkflowManager::new(states.clone()));
        let engine = Arc::new(ExecutionEngine::new(
            states,
            transitions,
            Arc::new(HandlerRegistry::new()),
            manager.clone(),
            &EngineConfig::default(),
        ));
        let monitor = MonitoringLoop::new(manager.clone(), engine, period);
        (manager, monitor)
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (_, monitor) = monitor(Duration::from_millis(10));
        assert!(!monitor.is_running());

        assert!(monitor.start());
        assert!(!monitor.start());
        assert!(monitor.is_running());

        assert!(monitor.stop().await);
        assert!(!monitor.is_running());
        assert!(!monitor.stop().await);

        assert!(monitor.start());
        assert!(monitor.stop().await);
    }

    #[tokio::test]
    async fn test_cycle_publishes_stats() {
        let (manager, monitor) = monitor(Duration::from_millis(10));
        manager.create_workflow("w", "start", WorkflowPriority::Normal, Metadata::new());
        assert!(monitor.latest_stats().is_none());

        monitor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop().await;

        let stats = monitor.latest_stats().unwrap();
        assert_eq!(stats.total_workflows, 1);
        assert_eq!(stats.pending_workflows, 1);
    }

    #[test]
    fn test_run_once() {
        let (manager, monitor) = monitor(Duration::from_secs(60));
        manager.create_workflow("w", "start", WorkflowPriority::Normal, Metadata::new());
        manager.create_workflow("w", "start", WorkflowPriority::Normal, Metadata::new());

        let stats = monitor.run_once().unwrap();
        assert_eq!(stats.total_workflows, 2);
        assert_eq!(monitor.latest_stats(), Some(stats));
    }
}
