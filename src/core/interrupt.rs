use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::callback::CallbackError;
use crate::error::{NodeError, NodeResult};
use crate::schema::{ConversionWarning, NodeKey, NodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptEventType {
    /// Waiting for a form filled in by the user.
    Input,
    /// Waiting for an answer to a question put to the user.
    Question,
    /// Waiting for the user to authorize a plugin.
    OauthPlugin,
}

/// Why and where a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptEvent {
    pub id: i64,
    pub node_key: NodeKey,
    pub node_type: NodeType,
    pub node_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_icon: Option<String>,
    /// Opaque payload for the client, e.g. a form schema.
    pub interrupt_data: String,
    pub event_type: InterruptEventType,
}

/// Everything a completed invocation hands back to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub output: HashMap<String, Value>,
    pub answer: Option<String>,
    pub raw_output: Option<String>,
    pub extra: HashMap<String, Value>,
    pub warnings: Vec<ConversionWarning>,
    /// Input to report instead of the resolved one, e.g. the merged item inputs of a batch.
    pub input: Option<HashMap<String, Value>>,
    /// Error carried over from merged invocations that still completed.
    pub error: Option<CallbackError>,
}

impl NodeOutput {
    pub fn new(output: HashMap<String, Value>) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<ConversionWarning>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Result of one node invocation. Interrupts are control flow, not errors.
#[derive(Debug)]
pub enum NodeOutcome {
    Completed(NodeOutput),
    /// One event for a leaf node, possibly several from a composite or sub-workflow.
    Interrupted(Vec<InterruptEvent>),
    Failed(NodeError),
}

impl NodeOutcome {
    pub fn interrupted(event: InterruptEvent) -> Self {
        NodeOutcome::Interrupted(vec![event])
    }
}

impl From<NodeResult<NodeOutput>> for NodeOutcome {
    fn from(result: NodeResult<NodeOutput>) -> Self {
        match result {
            Ok(output) => NodeOutcome::Completed(output),
            Err(e) => NodeOutcome::Failed(e),
        }
    }
}
