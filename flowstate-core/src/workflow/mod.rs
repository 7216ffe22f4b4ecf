//! Workflow state-machine engine

pub mod engine;
pub mod handler;
pub mod handlers;
pub mod loader;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod reporting;
pub mod system;
pub mod validator;

pub use engine::ExecutionEngine;
pub use handler::{HandlerRegistry, StateHandler, TransitionHandler};
pub use handlers::{CommandHandler, FnAction, FnHandler, LogAction, StaticHandler};
pub use loader::{HandlerSpec, StateSpec, TransitionSpec, WorkflowDocument};
pub use manager::WorkflowManager;
pub use monitor::MonitoringLoop;
pub use registry::{StateRegistry, TransitionRegistry};
pub use reporting::{render_system_stats, render_workflow_report};
pub use system::WorkflowSystem;
pub use validator::{DefinitionValidator, ValidationError, ValidationResult};
