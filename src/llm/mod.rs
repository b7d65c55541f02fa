//! Model inference contract consumed by LLM nodes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod error;
pub mod types;

pub use error::LlmError;
pub use types::{
    ChatRole, ContentPart, Message, MessageContent, ModelCapabilities, ModelRequest, ModelResponse,
    StreamChunk, TokenUsage,
};

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::default()
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError>;

    /// Stream fragments into `chunk_tx` and return the assembled response.
    ///
    /// The default implementation delivers the whole response as one fragment.
    async fn stream(
        &self,
        request: ModelRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ModelResponse, LlmError> {
        let response = self.generate(request).await?;
        let _ = chunk_tx
            .send(StreamChunk {
                delta: response.content.clone(),
                finish_reason: response.finish_reason.clone(),
            })
            .await;
        Ok(response)
    }
}

/// Model clients by the name LLM nodes refer to them with.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn ModelClient>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn ModelClient>) {
        self.models.insert(name.into(), client);
    }

    pub fn with(mut self, name: impl Into<String>, client: Arc<dyn ModelClient>) -> Self {
        self.register(name, client);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ModelClient>, LlmError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::ModelNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }
}
