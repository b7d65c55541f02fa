use thiserror::Error;

use crate::error::NodeError;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limit exceeded: retry after {retry_after:?}s")]
    RateLimitExceeded { retry_after: Option<u64> },

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<LlmError> for NodeError {
    fn from(e: LlmError) -> Self {
        NodeError::ModelError(e.to_string())
    }
}
