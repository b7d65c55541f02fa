use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::interrupt::InterruptEvent;

/// Execution status of one run attempt. Exactly one terminal state is reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success(HashMap<String, Value>),
    Failed(String),
    Canceled,
    Interrupted(Vec<InterruptEvent>),
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}
