//! Process-level services

pub mod logging;

pub use logging::{init_logging, log_workflow_event};
