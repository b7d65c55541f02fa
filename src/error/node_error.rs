use thiserror::Error;

use crate::core::checkpoint::CheckpointError;
use crate::core::id_generator::IdGenError;
use crate::core::merge::MergeError;
use crate::error::WorkflowError;

/// Node-level errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Missing required input: {0}")]
    MissingInput(String),
    #[error("Input validation error: {0}")]
    InputValidationError(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Collaborator not configured: {0}")]
    CollaboratorMissing(&'static str),
    #[error("Model error: {0}")]
    ModelError(String),
    #[error("Service error: {0}")]
    ServiceError(String),
    #[error("Merge error: {0}")]
    MergeError(#[from] MergeError),
    #[error("Id generation failed: {0}")]
    IdGeneration(#[from] IdGenError),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Node panicked: {0}")]
    Panicked(String),
    #[error("Node canceled")]
    Canceled,
}

impl NodeError {
    /// Infrastructure failures are fatal to the run attempt and bypass
    /// per-node exception handling.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            NodeError::IdGeneration(_) | NodeError::Checkpoint(_) | NodeError::Canceled
        )
    }
}

impl NodeError {
    /// Fold the failure of a nested scope into an error of the node owning it.
    /// Infrastructure failures keep their kind so they stay fatal.
    pub fn from_nested(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NodeExecution { source, .. } if source.is_infrastructure() => source,
            WorkflowError::NodeExecution {
                node_key, source, ..
            } => NodeError::ExecutionError(format!("{}: {}", node_key, source)),
            WorkflowError::NodeError(source) => *source,
            WorkflowError::Canceled => NodeError::Canceled,
            WorkflowError::Checkpoint(e) => NodeError::Checkpoint(e),
            WorkflowError::IdGeneration(e) => NodeError::IdGeneration(e),
            other => NodeError::ExecutionError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
