// Conditions for condition and loop steps

//! # Rule Conditions
//!
//! A condition step (or loop step) carries an opaque condition string. The
//! default evaluator reads that string as JSON describing a [`RuleCondition`]
//! and evaluates it against the data flowing into the step.
//!
//! ## Field lookup
//!
//! Fields are looked up in the step input first and in the execution
//! parameters second. Dotted paths walk nested objects, and numeric segments
//! index into arrays: `review.findings.0.severity`.
//!
//! ## Serde Tag for JSON Serialization
//! The `#[serde(tag = "type")]` attribute creates "tagged union" JSON:
//! `{"type": "FieldEquals", "field": "status", "value": "approved"}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Parameters;
use crate::{MachineError, Result};

/// A named condition
///
/// Used as the element type of `And` / `Or` so composite conditions can report
/// which part passed or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub condition: RuleCondition,
}

/// Conditions the default evaluator understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuleCondition {
    /// Field is present (any value, including null)
    ///
    /// Example: `{"type": "FieldExists", "field": "reviewer"}`
    FieldExists { field: String },

    /// Field equals a JSON value exactly
    ///
    /// Example: `{"type": "FieldEquals", "field": "status", "value": "approved"}`
    FieldEquals { field: String, value: Value },

    /// Numeric field is strictly greater than a threshold
    FieldGreaterThan { field: String, value: f64 },

    /// Numeric field is strictly less than a threshold
    FieldLessThan { field: String, value: f64 },

    /// String field contains a substring, or array field contains the string
    FieldContains { field: String, substring: String },

    /// All nested rules pass; empty is true
    And { rules: Vec<Rule> },

    /// At least one nested rule passes; empty is false
    Or { rules: Vec<Rule> },

    /// Nested rule fails
    Not { rule: Box<Rule> },
}

impl Rule {
    pub fn new(id: impl Into<String>, condition: RuleCondition) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            condition,
        }
    }

    pub fn evaluate(&self, data: &Value, fallback: &Parameters) -> bool {
        self.condition.evaluate(data, fallback)
    }
}

impl RuleCondition {
    /// Parse a condition expression
    ///
    /// Accepts a tagged condition object, a `Rule` object, or a bare JSON
    /// boolean for unconditional branches.
    pub fn parse(expression: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(expression.trim()).map_err(|e| {
            MachineError::validation(format!("condition is not valid JSON: {}", e))
        })?;

        match value {
            Value::Bool(true) => Ok(RuleCondition::And { rules: Vec::new() }),
            Value::Bool(false) => Ok(RuleCondition::Or { rules: Vec::new() }),
            Value::Object(ref map) if map.contains_key("condition") => {
                let rule: Rule = serde_json::from_value(value).map_err(|e| {
                    MachineError::validation(format!("invalid rule: {}", e))
                })?;
                Ok(rule.condition)
            }
            other => serde_json::from_value(other)
                .map_err(|e| MachineError::validation(format!("invalid condition: {}", e))),
        }
    }

    pub fn evaluate(&self, data: &Value, fallback: &Parameters) -> bool {
        match self {
            RuleCondition::FieldExists { field } => lookup(data, fallback, field).is_some(),

            RuleCondition::FieldEquals { field, value } => {
                lookup(data, fallback, field) == Some(value)
            }

            RuleCondition::FieldGreaterThan { field, value } => lookup(data, fallback, field)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v > *value),

            RuleCondition::FieldLessThan { field, value } => lookup(data, fallback, field)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v < *value),

            RuleCondition::FieldContains { field, substring } => {
                match lookup(data, fallback, field) {
                    Some(Value::String(s)) => s.contains(substring.as_str()),
                    Some(Value::Array(items)) => items
                        .iter()
                        .any(|item| item.as_str() == Some(substring.as_str())),
                    _ => false,
                }
            }

            RuleCondition::And { rules } => rules.iter().all(|rule| rule.evaluate(data, fallback)),

            RuleCondition::Or { rules } => rules.iter().any(|rule| rule.evaluate(data, fallback)),

            RuleCondition::Not { rule } => !rule.evaluate(data, fallback),
        }
    }

    /// Human-readable account of the evaluation, for logs
    pub fn explain(&self, data: &Value, fallback: &Parameters) -> String {
        match self {
            RuleCondition::FieldExists { field } => {
                if self.evaluate(data, fallback) {
                    format!("Field '{}' exists", field)
                } else {
                    format!("Field '{}' does not exist", field)
                }
            }
            RuleCondition::FieldEquals { field, value } => {
                if self.evaluate(data, fallback) {
                    format!("Field '{}' equals {}", field, value)
                } else {
                    format!("Field '{}' does not equal {}", field, value)
                }
            }
            RuleCondition::FieldGreaterThan { field, value } => {
                match lookup(data, fallback, field).and_then(|v| v.as_f64()) {
                    Some(v) if v > *value => format!("Field '{}' ({}) > {}", field, v, value),
                    Some(v) => format!("Field '{}' ({}) <= {}", field, v, value),
                    None => format!("Field '{}' is not a number", field),
                }
            }
            RuleCondition::FieldLessThan { field, value } => {
                match lookup(data, fallback, field).and_then(|v| v.as_f64()) {
                    Some(v) if v < *value => format!("Field '{}' ({}) < {}", field, v, value),
                    Some(v) => format!("Field '{}' ({}) >= {}", field, v, value),
                    None => format!("Field '{}' is not a number", field),
                }
            }
            RuleCondition::FieldContains { field, substring } => {
                if self.evaluate(data, fallback) {
                    format!("Field '{}' contains '{}'", field, substring)
                } else {
                    format!("Field '{}' does not contain '{}'", field, substring)
                }
            }
            RuleCondition::And { rules } | RuleCondition::Or { rules } => {
                let passed = rules
                    .iter()
                    .filter(|rule| rule.evaluate(data, fallback))
                    .count();
                let op = if matches!(self, RuleCondition::And { .. }) {
                    "AND"
                } else {
                    "OR"
                };
                format!("{}: {} of {} rules passed", op, passed, rules.len())
            }
            RuleCondition::Not { rule } => {
                format!("NOT ({})", rule.condition.explain(data, fallback))
            }
        }
    }
}

/// Resolve a dotted path in `data`, falling back to `fallback`
fn lookup<'a>(data: &'a Value, fallback: &'a Parameters, path: &str) -> Option<&'a Value> {
    walk(data, path).or_else(|| {
        let mut segments = path.splitn(2, '.');
        let head = segments.next()?;
        let root = fallback.get(head)?;
        match segments.next() {
            Some(rest) => walk(root, rest),
            None => Some(root),
        }
    })
}

fn walk<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
