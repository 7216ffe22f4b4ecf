//! # Flowstate Core Library
//!
//! In-memory workflow state-machine engine: state and transition registries,
//! a workflow manager, a bounded concurrent execution engine, a monitoring
//! loop and reporting.

pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use error::{EngineError, EngineResult};
pub use workflow::WorkflowSystem;
