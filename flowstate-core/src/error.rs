//! Engine error taxonomy
//!
//! Registry and manager validation errors never reach callers of the public
//! operations as `Err`; they are folded into `false`/`None` returns. Handler
//! failures are contained by the execution engine and recorded as results.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised inside the workflow engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("State not found: {0}")]
    StateNotFound(String),

    #[error("Invalid transition definition: {0}")]
    InvalidTransitionDefinition(String),

    #[error("No handler registered for state '{0}'")]
    HandlerNotFound(String),

    #[error("Handler for state '{state}' failed: {message}")]
    HandlerExecutionFailure { state: String, message: String },

    #[error("State '{state}' timed out after {timeout_ms}ms")]
    StateTimeout { state: String, timeout_ms: u64 },

    #[error("Monitoring cycle failed: {0}")]
    MonitoringCycleError(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Report serialization failed: {0}")]
    Report(String),
}

/// Convenience alias for engine results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::StateTimeout {
            state: "fetch".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "State 'fetch' timed out after 250ms");

        let err = EngineError::HandlerNotFound("publish".to_string());
        assert!(err.to_string().contains("publish"));
    }
}
