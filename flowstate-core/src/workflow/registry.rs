//! State and transition registries
//!
//! Both registries are read-mostly: they are populated once at setup and then
//! shared by every worker. Mutation takes the write lock.

use crate::error::{EngineError, EngineResult};
use crate::models::workflow::{StateDefinition, TransitionDefinition, TransitionKind};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct StateTable {
    states: HashMap<String, StateDefinition>,
    /// Registration order
    order: Vec<String>,
}

/// Registry of state definitions keyed by unique name
#[derive(Default)]
pub struct StateRegistry {
    table: RwLock<StateTable>,
}

impl StateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StateTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a state. Returns false if the name is already taken.
    pub fn add_state(&self, definition: StateDefinition) -> bool {
        let mut table = self.write();
        if table.states.contains_key(&definition.name) {
            tracing::warn!(state = %definition.name, "Rejected duplicate state definition");
            return false;
        }

        let name = definition.name.clone();
        table.order.push(name.clone());
        table.states.insert(name.clone(), definition);

        tracing::debug!(state = %name, "State registered");
        true
    }

    /// Get a state definition by name
    pub fn get_state(&self, name: &str) -> Option<StateDefinition> {
        self.read().states.get(name).cloned()
    }

    /// Check if a state exists
    pub fn contains(&self, name: &str) -> bool {
        self.read().states.contains_key(name)
    }

    /// State names in registration order
    pub fn list_states(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// All definitions in registration order
    pub fn definitions(&self) -> Vec<StateDefinition> {
        let table = self.read();
        table
            .order
            .iter()
            .filter_map(|name| table.states.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct RegisteredTransition {
    sequence: u64,
    definition: TransitionDefinition,
}

#[derive(Default)]
struct TransitionTable {
    by_source: HashMap<String, Vec<RegisteredTransition>>,
    next_sequence: u64,
}

/// Registry of transitions indexed by source state
pub struct TransitionRegistry {
    states: Arc<StateRegistry>,
    table: RwLock<TransitionTable>,
}

impl TransitionRegistry {
    /// Create an empty registry validating sources against `states`
    pub fn new(states: Arc<StateRegistry>) -> Self {
        Self {
            states,
            table: RwLock::new(TransitionTable::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TransitionTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TransitionTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check a definition without registering it
    pub fn check(&self, definition: &TransitionDefinition) -> EngineResult<()> {
        if !self.states.contains(&definition.from_state) {
            return Err(EngineError::InvalidTransitionDefinition(format!(
                "source state '{}' is not registered",
                definition.from_state
            )));
        }

        match (definition.kind, &definition.predicate) {
            (TransitionKind::Conditional, None) => {
                Err(EngineError::InvalidTransitionDefinition(format!(
                    "conditional transition {} -> {} has no predicate",
                    definition.from_state, definition.to_state
                )))
            }
            (TransitionKind::Automatic, Some(_)) => {
                Err(EngineError::InvalidTransitionDefinition(format!(
                    "automatic transition {} -> {} must not carry a predicate",
                    definition.from_state, definition.to_state
                )))
            }
            _ => Ok(()),
        }
    }

    /// Register a transition, reporting why it was rejected
    pub fn try_add_transition(&self, definition: TransitionDefinition) -> EngineResult<()> {
        self.check(&definition)?;

        let mut table = self.write();
        let sequence = table.next_sequence;
        table.next_sequence += 1;

        tracing::debug!(
            from = %definition.from_state,
            to = %definition.to_state,
            priority = definition.priority,
            "Transition registered"
        );

        let entries = table
            .by_source
            .entry(definition.from_state.clone())
            .or_default();
        entries.push(RegisteredTransition {
            sequence,
            definition,
        });
        entries.sort_by(|a, b| {
            b.definition
                .priority
                .cmp(&a.definition.priority)
                .then(a.sequence.cmp(&b.sequence))
        });

        Ok(())
    }

    /// Register a transition. Returns false if the definition is invalid.
    pub fn add_transition(&self, definition: TransitionDefinition) -> bool {
        match self.try_add_transition(definition) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected transition definition");
                false
            }
        }
    }

    /// Outgoing transitions of `state`, priority descending then registration order
    pub fn get_transitions(&self, state: &str) -> Vec<TransitionDefinition> {
        self.read()
            .by_source
            .get(state)
            .map(|entries| entries.iter().map(|e| e.definition.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether `state` has any outgoing transition
    pub fn has_outgoing(&self, state: &str) -> bool {
        self.read()
            .by_source
            .get(state)
            .map(|entries| !entries.is_empty())
            .unwrap_or(false)
    }

    /// Every registered transition in registration order
    pub fn definitions(&self) -> Vec<TransitionDefinition> {
        let table = self.read();
        let mut all: Vec<&RegisteredTransition> = table.by_source.values().flatten().collect();
        all.sort_by_key(|entry| entry.sequence);
        all.into_iter().map(|e| e.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_source.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
