//! Whole-graph consistency checks for registered definitions

use crate::workflow::handler::HandlerRegistry;
use crate::workflow::registry::{StateRegistry, TransitionRegistry};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Retry limits above this are reported as a warning
pub const RETRY_LIMIT_WARNING: u32 = 10;

/// Validation error type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Validation result
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Validator over the registries of one system
pub struct DefinitionValidator<'a> {
    states: &'a StateRegistry,
    transitions: &'a TransitionRegistry,
    handlers: &'a HandlerRegistry,
}

impl<'a> DefinitionValidator<'a> {
    pub fn new(
        states: &'a StateRegistry,
        transitions: &'a TransitionRegistry,
        handlers: &'a HandlerRegistry,
    ) -> Self {
        Self {
            states,
            transitions,
            handlers,
        }
    }

    /// Validate the registered graph.
    ///
    /// Reachability is only checked when `entry_points` is non-empty.
    pub fn validate(&self, entry_points: &[String]) -> ValidationResult {
        let mut result = ValidationResult::new();

        for state in self.states.definitions() {
            let field = format!("states.{}", state.name);

            for dependency in &state.dependencies {
                if !self.states.contains(dependency) {
                    result.add_error(
                        format!("{}.dependencies", field),
                        format!("depends on unknown state '{}'", dependency),
                    );
                }
            }

            if !self.handlers.has_state_handler(&state.name) {
                result.add_warning(format!("State '{}' has no registered handler", state.name));
            }
            if state.retry_limit > RETRY_LIMIT_WARNING {
                result.add_warning(format!(
                    "State '{}' allows {} retries (more than {})",
                    state.name, state.retry_limit, RETRY_LIMIT_WARNING
                ));
            }
            if state.backoff_multiplier < 1.0 {
                result.add_warning(format!(
                    "State '{}' has backoff multiplier {} below 1.0; delays will shrink",
                    state.name, state.backoff_multiplier
                ));
            }
        }

        for (i, transition) in self.transitions.definitions().iter().enumerate() {
            if !self.states.contains(&transition.to_state) {
                result.add_error(
                    format!("transitions[{}].to_state", i),
                    format!(
                        "transition {} -> {} targets an unknown state",
                        transition.from_state, transition.to_state
                    ),
                );
            }
        }

        for entry in entry_points {
            if !self.states.contains(entry) {
                result.add_error(
                    "initial_state",
                    format!("initial state '{}' is not registered", entry),
                );
            }
        }

        if !entry_points.is_empty() {
            let reachable = self.reachable_from(entry_points);
            for name in self.states.list_states() {
                if !reachable.contains(&name) {
                    result.add_warning(format!("State '{}' is unreachable", name));
                }
            }
        }

        result
    }

    fn reachable_from(&self, entry_points: &[String]) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = entry_points.iter().cloned().collect();

        while let Some(state) = queue.pop_front() {
            if !seen.insert(state.clone()) {
                continue;
            }
            for transition in self.transitions.get_transitions(&state) {
                if !seen.contains(&transition.to_state) {
                    queue.push_back(transition.to_state);
                }
            }
        }

        seen
    }
}
