use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ServiceError;
use crate::core::execute_config::ChatMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    #[default]
    Semantic,
    FullText,
    Hybrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub search_type: SearchType,
    #[serde(default)]
    pub enable_rerank: bool,
    #[serde(default)]
    pub enable_query_rewrite: bool,
    #[serde(default)]
    pub is_personal_only: bool,
    #[serde(default)]
    pub enable_nl2sql: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsingStrategy {
    #[serde(default)]
    pub extract_image: bool,
    #[serde(default)]
    pub extract_table: bool,
    #[serde(default)]
    pub image_ocr: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingStrategy {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default)]
    pub overlap: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

fn default_chunk_size() -> u32 {
    800
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: 0,
            separator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveRequest {
    pub query: String,
    pub knowledge_ids: Vec<i64>,
    pub strategy: RetrievalStrategy,
    /// Present only when the node reads chat history.
    pub chat_history: Option<Vec<ChatMessage>>,
}

/// A ranked piece of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSlice {
    pub document_id: i64,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateDocumentRequest {
    pub knowledge_id: i64,
    pub parsing: ParsingStrategy,
    pub chunking: ChunkingStrategy,
    pub file_url: String,
    pub file_name: String,
    /// Lowercase, without the leading dot.
    pub file_extension: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateDocumentResponse {
    pub document_id: i64,
    pub file_name: String,
    pub file_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteDocumentRequest {
    pub knowledge_id: Option<i64>,
    pub document_id: String,
}

#[async_trait]
pub trait KnowledgeService: Send + Sync {
    async fn retrieve(&self, request: RetrieveRequest) -> Result<Vec<RetrievedSlice>, ServiceError>;

    async fn create_document(
        &self,
        request: CreateDocumentRequest,
    ) -> Result<CreateDocumentResponse, ServiceError>;

    /// Returns whether a document was removed.
    async fn delete_document(&self, request: DeleteDocumentRequest) -> Result<bool, ServiceError>;
}
