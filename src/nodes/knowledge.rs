//! Knowledge base nodes: thin adapters over the knowledge service.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::executor::{required_str, NodeExecutor};
use crate::core::execute_config::FileInfo;
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{NodeOutcome, NodeOutput};
use crate::error::{NodeError, NodeResult};
use crate::schema::config::{ChatHistorySetting, DeleterConfig, IndexerConfig, RetrieverConfig};
use crate::schema::workflow::file_info_from_url;
use crate::service::knowledge::{CreateDocumentRequest, DeleteDocumentRequest, RetrieveRequest};

pub const QUERY_INPUT: &str = "Query";
pub const KNOWLEDGE_INPUT: &str = "knowledge";
pub const DOCUMENT_ID_INPUT: &str = "documentID";

pub struct RetrieverNode {
    config: RetrieverConfig,
}

impl RetrieverNode {
    pub fn new(config: RetrieverConfig) -> Self {
        Self { config }
    }

    async fn run(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeResult<NodeOutput> {
        let query = required_str(&input, QUERY_INPUT)?;
        let chat_history = ChatHistorySetting::enabled_rounds(self.config.chat_history.as_ref())
            .map(|rounds| ctx.chat_history(rounds));
        let slices = ctx
            .collaborators()
            .knowledge()?
            .retrieve(RetrieveRequest {
                query: query.to_string(),
                knowledge_ids: self.config.knowledge_ids.clone(),
                strategy: self.config.strategy.clone(),
                chat_history,
            })
            .await?;

        tracing::debug!(node_key = ctx.node_key(), hits = slices.len(), "knowledge retrieved");
        let list = slices
            .into_iter()
            .map(|s| json!({"documentId": s.document_id.to_string(), "output": s.content}))
            .collect();
        Ok(NodeOutput::new(HashMap::from([(
            "outputList".to_string(),
            Value::Array(list),
        )])))
    }
}

#[async_trait]
impl NodeExecutor for RetrieverNode {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        self.run(input, ctx).await.into()
    }
}

pub struct IndexerNode {
    config: IndexerConfig,
}

impl IndexerNode {
    pub fn new(config: IndexerConfig) -> Self {
        Self { config }
    }

    async fn run(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeResult<NodeOutput> {
        let url = required_str(&input, KNOWLEDGE_INPUT)?;
        let file = resolve_file(url, &ctx.exe_cfg().input_file_fields)?;
        let extension = file.file_extension.trim_start_matches('.').to_lowercase();
        if extension.is_empty() {
            return Err(NodeError::InputValidationError(format!(
                "cannot tell the file type of '{}'",
                file.file_name
            )));
        }

        let created = ctx
            .collaborators()
            .knowledge()?
            .create_document(CreateDocumentRequest {
                knowledge_id: self.config.knowledge_id,
                parsing: self.config.parsing.clone(),
                chunking: self.config.chunking.clone(),
                file_url: url.to_string(),
                file_name: file.file_name,
                file_extension: extension,
            })
            .await?;

        Ok(NodeOutput::new(HashMap::from([
            ("documentId".to_string(), json!(created.document_id.to_string())),
            ("fileName".to_string(), json!(created.file_name)),
            ("fileUrl".to_string(), json!(created.file_url)),
        ])))
    }
}

/// Name and extension of an uploaded file: registered run files first, then
/// the name carried in the URL, then the last path segment.
fn resolve_file(url: &str, known: &HashMap<String, FileInfo>) -> NodeResult<FileInfo> {
    if let Some(info) = known.get(url) {
        return Ok(info.clone());
    }
    if let Some(info) = file_info_from_url(url) {
        return Ok(known.get(&info.file_url).cloned().unwrap_or(info));
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = path.rsplit('/').next().unwrap_or_default().to_string();
    if file_name.is_empty() {
        return Err(NodeError::InputValidationError(format!(
            "no file name in '{}'",
            url
        )));
    }
    let file_extension = std::path::Path::new(&file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    Ok(FileInfo {
        file_url: url.to_string(),
        file_name,
        file_extension,
    })
}

#[async_trait]
impl NodeExecutor for IndexerNode {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        self.run(input, ctx).await.into()
    }
}

pub struct DeleterNode {
    config: DeleterConfig,
}

impl DeleterNode {
    pub fn new(config: DeleterConfig) -> Self {
        Self { config }
    }

    async fn run(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeResult<NodeOutput> {
        let document_id = match input.get(DOCUMENT_ID_INPUT) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(NodeError::MissingInput(DOCUMENT_ID_INPUT.to_string())),
        };
        let deleted = ctx
            .collaborators()
            .knowledge()?
            .delete_document(DeleteDocumentRequest {
                knowledge_id: self.config.knowledge_id,
                document_id,
            })
            .await?;
        Ok(NodeOutput::new(HashMap::from([(
            "isSuccess".to_string(),
            Value::Bool(deleted),
        )])))
    }
}

#[async_trait]
impl NodeExecutor for DeleterNode {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        self.run(input, ctx).await.into()
    }
}
