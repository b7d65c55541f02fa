use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{WorkflowError, WorkflowResult};

/// Engine-wide limits, shared by every run of a compiled workflow.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running nodes per scope; 0 means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Fan-out limit for batch nodes that do not set their own.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,
}

fn default_event_buffer() -> usize {
    256
}

fn default_batch_concurrency() -> usize {
    10
}

fn default_max_batch_size() -> usize {
    100
}

fn default_max_loop_iterations() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrency: 0,
            event_buffer: default_event_buffer(),
            batch_concurrency: default_batch_concurrency(),
            max_batch_size: default_max_batch_size(),
            max_loop_iterations: default_max_loop_iterations(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(content: &str) -> WorkflowResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| WorkflowError::InternalError(format!("invalid engine config: {}", e)))
    }

    pub fn from_toml(content: &str) -> WorkflowResult<Self> {
        toml::from_str(content)
            .map_err(|e| WorkflowError::InternalError(format!("invalid engine config: {}", e)))
    }

    /// Load from a `.json` or `.toml` file, picked by extension.
    pub async fn load(path: impl AsRef<Path>) -> WorkflowResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            WorkflowError::InternalError(format!("read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }
}
