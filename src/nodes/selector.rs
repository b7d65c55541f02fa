//! Conditional branching. Clauses are tried in order; the first that holds
//! picks the outgoing port.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::executor::NodeExecutor;
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{NodeOutcome, NodeOutput};
use crate::schema::config::{Clause, ClauseLogic, Condition, Operand, Operator, SelectorConfig};
use crate::schema::SELECTED_FIELD;

pub struct SelectorNode {
    config: SelectorConfig,
}

impl SelectorNode {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Index of the first clause that holds.
    pub fn select(&self, input: &HashMap<String, Value>) -> Option<usize> {
        self.config.clauses.iter().position(|c| clause_holds(c, input))
    }
}

#[async_trait]
impl NodeExecutor for SelectorNode {
    async fn invoke(&self, input: HashMap<String, Value>, _ctx: &ExecutionContext) -> NodeOutcome {
        let selected = match self.select(&input) {
            Some(i) => json!(i),
            None => Value::Null,
        };
        NodeOutcome::Completed(NodeOutput::new(HashMap::from([(
            SELECTED_FIELD.to_string(),
            selected,
        )])))
    }
}

fn clause_holds(clause: &Clause, input: &HashMap<String, Value>) -> bool {
    let mut results = clause.conditions.iter().map(|c| condition_holds(c, input));
    match clause.logic {
        ClauseLogic::And => results.all(|r| r),
        ClauseLogic::Or => results.any(|r| r),
    }
}

fn condition_holds(cond: &Condition, input: &HashMap<String, Value>) -> bool {
    let left = input.get(&cond.left).unwrap_or(&Value::Null);
    let right = match &cond.right {
        Some(Operand::Literal(v)) => v,
        Some(Operand::Input(name)) => input.get(name).unwrap_or(&Value::Null),
        None => &Value::Null,
    };

    match cond.operator {
        Operator::Equal => loose_eq(left, right),
        Operator::NotEqual => !loose_eq(left, right),
        Operator::Empty => is_empty(left),
        Operator::NotEmpty => !is_empty(left),
        Operator::Contains => contains(left, right),
        Operator::NotContains => !contains(left, right),
        Operator::GreaterThan => compare(left, right).map(|o| o.is_gt()).unwrap_or(false),
        Operator::GreaterOrEqual => compare(left, right).map(|o| o.is_ge()).unwrap_or(false),
        Operator::LessThan => compare(left, right).map(|o| o.is_lt()).unwrap_or(false),
        Operator::LessOrEqual => compare(left, right).map(|o| o.is_le()).unwrap_or(false),
        Operator::IsTrue => as_bool(left) == Some(true),
        Operator::IsFalse => as_bool(left) == Some(false),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Bool(_), Value::String(_)) | (Value::String(_), Value::Bool(_)) => {
            as_bool(a).is_some() && as_bool(a) == as_bool(b)
        }
        _ => false,
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
        (Value::String(s), Value::Number(n)) => s.contains(&n.to_string()),
        (Value::Array(items), needle) => items.iter().any(|i| loose_eq(i, needle)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    as_f64(a)?.partial_cmp(&as_f64(b)?)
}
