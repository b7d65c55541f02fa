//! Contracts of the external services node kinds drive.
//!
//! The orchestrator only calls into these; indexing, plugin authoring and
//! persistence live behind them.

pub mod knowledge;
pub mod plugin;

use crate::error::NodeError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<ServiceError> for NodeError {
    fn from(e: ServiceError) -> Self {
        NodeError::ServiceError(e.to_string())
    }
}

pub use knowledge::KnowledgeService;
pub use plugin::PluginService;
