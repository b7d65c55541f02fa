//! Workflow-level error types.

use super::NodeError;
use crate::core::checkpoint::CheckpointError;
use crate::core::id_generator::IdGenError;
use crate::dsl::validation::ValidationReport;
use crate::schema::NodeType;
use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("DSL parse error: {0}")]
    DslParseError(String),
    #[error("Validation failed: {}", summarize(.0))]
    ValidationFailed(Box<ValidationReport>),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Compile error: {0}")]
    CompileError(String),
    #[error("Node execution error: node={node_key}, type={node_type}, error={source}")]
    NodeExecution {
        node_key: String,
        node_type: NodeType,
        #[source]
        source: NodeError,
    },
    #[error("Resume rejected for execution {execute_id}: {reason}")]
    ResumeRejected { execute_id: i64, reason: String },
    #[error("No pending interrupt for node '{node_key}' in execution {execute_id}")]
    NoPendingInterrupt { execute_id: i64, node_key: String },
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Id generation failed: {0}")]
    IdGeneration(#[from] IdGenError),
    #[error("Workflow canceled")]
    Canceled,
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}

impl WorkflowError {
    /// Key of the node that caused the failure, when one is known.
    pub fn node_key(&self) -> Option<&str> {
        match self {
            WorkflowError::NodeExecution { node_key, .. } => Some(node_key),
            WorkflowError::NoPendingInterrupt { node_key, .. } => Some(node_key),
            _ => None,
        }
    }
}

fn summarize(report: &ValidationReport) -> String {
    report
        .errors()
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
