//! Transition predicates
//!
//! A predicate names a context field, an operator and an expected value.
//! Only equality is supported. Predicates are plain data evaluated by a small
//! interpreter; nothing is compiled or executed dynamically.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing the `field==value` form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateParseError {
    #[error("Predicate field name is empty")]
    EmptyField,

    #[error("Predicate '{0}' has no '==' operator")]
    MissingOperator(String),

    #[error("Unsupported predicate operator '{0}' (only '==' is supported)")]
    UnsupportedOperator(String),
}

/// Comparison operator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    /// Field value equals the expected value
    #[default]
    Equals,
}

/// Condition gating a conditional transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PredicateRepr")]
pub struct Predicate {
    /// Context field, dotted paths walk into nested objects
    pub field: String,
    /// Comparison operator
    #[serde(default)]
    pub op: PredicateOp,
    /// Expected value
    pub value: Value,
}

/// Accepted serialized forms: `"status==success"` or an explicit object
#[derive(Deserialize)]
#[serde(untagged)]
enum PredicateRepr {
    Expression(String),
    Explicit {
        field: String,
        #[serde(default)]
        op: PredicateOp,
        value: Value,
    },
}

impl TryFrom<PredicateRepr> for Predicate {
    type Error = PredicateParseError;

    fn try_from(repr: PredicateRepr) -> Result<Self, Self::Error> {
        match repr {
            PredicateRepr::Expression(expr) => expr.parse(),
            PredicateRepr::Explicit { field, op, value } => {
                if field.trim().is_empty() {
                    return Err(PredicateParseError::EmptyField);
                }
                Ok(Self { field, op, value })
            }
        }
    }
}

impl Predicate {
    /// Build an equality predicate
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: PredicateOp::Equals,
            value: value.into(),
        }
    }

    /// Evaluate against context variables. A missing field never matches.
    pub fn evaluate(&self, variables: &Map<String, Value>) -> bool {
        let Some(actual) = lookup(variables, &self.field) else {
            return false;
        };

        match self.op {
            PredicateOp::Equals => values_match(actual, &self.value),
        }
    }
}

impl FromStr for Predicate {
    type Err = PredicateParseError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let Some((field, raw)) = expr.split_once("==") else {
            for op in ["!=", ">=", "<=", ">", "<"] {
                if expr.contains(op) {
                    return Err(PredicateParseError::UnsupportedOperator(op.to_string()));
                }
            }
            return Err(PredicateParseError::MissingOperator(expr.to_string()));
        };

        let field = field.trim();
        if field.is_empty() {
            return Err(PredicateParseError::EmptyField);
        }

        Ok(Self::equals(field, parse_expected(raw.trim())))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            PredicateOp::Equals => "==",
        };
        match &self.value {
            Value::String(s) => write!(f, "{}{}{}", self.field, op, s),
            other => write!(f, "{}{}{}", self.field, op, other),
        }
    }
}

/// Quoted text is a string, valid JSON is taken as-is, anything else is a bare string
fn parse_expected(raw: &str) -> Value {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn lookup<'a>(variables: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = variables.get(first)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn values_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }

    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a == b;
    }

    match (scalar_text(actual), scalar_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
