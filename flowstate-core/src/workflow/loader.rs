//! YAML workflow documents
//!
//! A document bundles states, transitions and built-in handler bindings so a
//! whole graph can be registered on a [`WorkflowSystem`] in one call.
//!
//! ```yaml
//! name: deploy
//! initial_state: build
//! states:
//!   - name: build
//!     timeout_ms: 60000
//!     retry_limit: 2
//!     handler:
//!       type: command
//!       command: "cargo build --release"
//!   - name: publish
//!     handler:
//!       type: static
//!       output: { published: true }
//! transitions:
//!   - from_state: build
//!     to_state: publish
//!     predicate: "exit_code==0"
//! ```

use crate::models::predicate::Predicate;
use crate::models::workflow::{
    Metadata, StateDefinition, StepStatus, TransitionDefinition, TransitionKind,
};
use crate::workflow::handler::StateHandler;
use crate::workflow::handlers::{CommandHandler, StaticHandler};
use crate::workflow::system::WorkflowSystem;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Built-in handler bound to a state from YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Run a bash command
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    /// Report a fixed result
    Static {
        #[serde(default)]
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<StepStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HandlerSpec {
    pub fn build(&self) -> Arc<dyn StateHandler> {
        match self {
            HandlerSpec::Command {
                command,
                working_dir,
            } => {
                let mut handler = CommandHandler::new(command.clone());
                if let Some(dir) = working_dir {
                    handler = handler.with_working_dir(dir.clone());
                }
                Arc::new(handler)
            }
            HandlerSpec::Static {
                output,
                status,
                error,
            } => Arc::new(StaticHandler::new(
                status.unwrap_or(StepStatus::Completed),
                output.clone(),
                error.clone(),
            )),
        }
    }
}

/// State entry of a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSpec {
    #[serde(flatten)]
    pub definition: StateDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerSpec>,
}

/// Transition entry of a document; `kind` defaults from the predicate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionSpec {
    pub from_state: String,
    pub to_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransitionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

impl From<TransitionSpec> for TransitionDefinition {
    fn from(spec: TransitionSpec) -> Self {
        let kind = spec.kind.unwrap_or(if spec.predicate.is_some() {
            TransitionKind::Conditional
        } else {
            TransitionKind::Automatic
        });

        TransitionDefinition {
            from_state: spec.from_state,
            to_state: spec.to_state,
            kind,
            predicate: spec.predicate,
            priority: spec.priority,
            timeout_ms: spec.timeout_ms,
            actions: spec.actions,
            metadata: spec.metadata,
        }
    }
}

/// A workflow graph loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub initial_state: String,
    #[serde(default)]
    pub states: Vec<StateSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
    /// Default metadata for runs created from this document
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

impl WorkflowDocument {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse workflow YAML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid workflow file: {}", path.display()))
    }

    /// Register states, handlers and transitions on `system`.
    ///
    /// Everything valid is registered; the error lists what was rejected.
    pub fn register(&self, system: &WorkflowSystem) -> Result<()> {
        let mut rejected = Vec::new();

        for state in &self.states {
            let name = state.definition.name.clone();
            if !system.add_state(state.definition.clone()) {
                rejected.push(format!("state '{}' is already registered", name));
                continue;
            }
            if let Some(handler) = &state.handler {
                system.register_handler(name, handler.build());
            }
        }

        for transition in &self.transitions {
            let definition = TransitionDefinition::from(transition.clone());
            let label = format!("{} -> {}", definition.from_state, definition.to_state);
            if !system.add_transition(definition) {
                rejected.push(format!("transition {} was rejected", label));
            }
        }

        system.declare_entry_point(self.initial_state.clone());

        tracing::info!(
            workflow = %self.name,
            states = self.states.len(),
            transitions = self.transitions.len(),
            rejected = rejected.len(),
            "Workflow document registered"
        );

        if !rejected.is_empty() {
            bail!(
                "Workflow '{}' was only partially registered:\n  {}",
                self.name,
                rejected.join("\n  ")
            );
        }
        Ok(())
    }
}
