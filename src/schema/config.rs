//! Per-node-type configuration as a closed tagged union.
//!
//! [`NodeConfig::adapt`] turns the raw `config` object of a graph definition into
//! a typed payload, and [`NodeConfig::build`] turns a node schema into a runnable
//! [`NodeExecutor`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::node::{NodeSchema, NodeType};
use crate::compiler::BuildContext;
use crate::error::{WorkflowError, WorkflowResult};
use crate::nodes::{self, NodeExecutor};
use crate::service::knowledge::{ChunkingStrategy, ParsingStrategy, RetrievalStrategy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Values used for declared inputs the caller did not supply.
    #[serde(default)]
    pub default_values: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatePlan {
    #[default]
    ReturnVariables,
    UseAnswerContent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default)]
    pub terminate_plan: TerminatePlan,
    /// Answer template rendered with the node's inputs when using answer content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_template: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistorySetting {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub rounds: u32,
}

impl ChatHistorySetting {
    pub fn enabled_rounds(setting: Option<&ChatHistorySetting>) -> Option<u32> {
        setting.filter(|s| s.enable).map(|s| s.rounds)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Key of the model client in the collaborators' model registry.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<ChatHistorySetting>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseLogic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    Empty,
    NotEmpty,
    Contains,
    NotContains,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    IsTrue,
    IsFalse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Literal(Value),
    /// Name of one of the selector's own inputs.
    Input(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Name of one of the selector's own inputs.
    pub left: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Operand>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    #[serde(default)]
    pub logic: ClauseLogic,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    pub knowledge_ids: Vec<i64>,
    #[serde(default)]
    pub strategy: RetrievalStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<ChatHistorySetting>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub knowledge_id: i64,
    #[serde(default)]
    pub parsing: ParsingStrategy,
    #[serde(default)]
    pub chunking: ChunkingStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub plugin_id: i64,
    pub tool_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Form schema shown to the user; derived from output types when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowConfig {
    pub workflow_id: i64,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Inputs that hold the arrays to fan out over.
    pub input_arrays: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Array,
    Count,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub mode: LoopMode,
    #[serde(default)]
    pub input_arrays: Vec<String>,
    /// Input holding the iteration count in count mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_input: Option<String>,
}

/// Typed configuration, one variant per [`NodeType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum NodeConfig {
    Entry(EntryConfig),
    Exit(ExitConfig),
    Llm(LlmConfig),
    Selector(SelectorConfig),
    KnowledgeRetriever(RetrieverConfig),
    KnowledgeIndexer(IndexerConfig),
    KnowledgeDeleter(DeleterConfig),
    Plugin(PluginConfig),
    InputReceiver(ReceiverConfig),
    SubWorkflow(SubWorkflowConfig),
    Batch(BatchConfig),
    Loop(LoopConfig),
}

impl NodeConfig {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Entry(_) => NodeType::Entry,
            NodeConfig::Exit(_) => NodeType::Exit,
            NodeConfig::Llm(_) => NodeType::Llm,
            NodeConfig::Selector(_) => NodeType::Selector,
            NodeConfig::KnowledgeRetriever(_) => NodeType::KnowledgeRetriever,
            NodeConfig::KnowledgeIndexer(_) => NodeType::KnowledgeIndexer,
            NodeConfig::KnowledgeDeleter(_) => NodeType::KnowledgeDeleter,
            NodeConfig::Plugin(_) => NodeType::Plugin,
            NodeConfig::InputReceiver(_) => NodeType::InputReceiver,
            NodeConfig::SubWorkflow(_) => NodeType::SubWorkflow,
            NodeConfig::Batch(_) => NodeType::Batch,
            NodeConfig::Loop(_) => NodeType::Loop,
        }
    }

    /// Parse the raw `config` object of a graph definition node into its typed form.
    pub fn adapt(node_type: NodeType, raw: &Value) -> Result<Self, String> {
        let raw = if raw.is_null() {
            Value::Object(Default::default())
        } else {
            raw.clone()
        };
        let config = match node_type {
            NodeType::Entry => NodeConfig::Entry(parse(raw)?),
            NodeType::Exit => NodeConfig::Exit(parse(raw)?),
            NodeType::Llm => NodeConfig::Llm(parse(raw)?),
            NodeType::Selector => NodeConfig::Selector(parse(raw)?),
            NodeType::KnowledgeRetriever => NodeConfig::KnowledgeRetriever(parse(raw)?),
            NodeType::KnowledgeIndexer => NodeConfig::KnowledgeIndexer(parse(raw)?),
            NodeType::KnowledgeDeleter => NodeConfig::KnowledgeDeleter(parse(raw)?),
            NodeType::Plugin => NodeConfig::Plugin(parse(raw)?),
            NodeType::InputReceiver => NodeConfig::InputReceiver(parse(raw)?),
            NodeType::SubWorkflow => NodeConfig::SubWorkflow(parse(raw)?),
            NodeType::Batch => NodeConfig::Batch(parse(raw)?),
            NodeType::Loop => NodeConfig::Loop(parse(raw)?),
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), String> {
        match self {
            NodeConfig::Llm(c) if c.model.trim().is_empty() => Err("llm model is required".into()),
            NodeConfig::Llm(c) if c.user_prompt.trim().is_empty() => {
                Err("llm user_prompt is required".into())
            }
            NodeConfig::Selector(c) if c.clauses.is_empty() => {
                Err("selector needs at least one clause".into())
            }
            NodeConfig::Selector(c) if c.clauses.iter().any(|cl| cl.conditions.is_empty()) => {
                Err("selector clause without conditions".into())
            }
            NodeConfig::KnowledgeRetriever(c) if c.knowledge_ids.is_empty() => {
                Err("knowledge_ids is required".into())
            }
            NodeConfig::KnowledgeIndexer(c) if c.knowledge_id <= 0 => {
                Err("knowledge_id is required".into())
            }
            NodeConfig::Plugin(c) if c.plugin_id <= 0 || c.tool_id <= 0 => {
                Err("plugin_id and tool_id are required".into())
            }
            NodeConfig::Batch(c) if c.input_arrays.is_empty() => {
                Err("batch needs at least one input array".into())
            }
            NodeConfig::Batch(c) if c.concurrency == Some(0) => {
                Err("batch concurrency must be positive".into())
            }
            NodeConfig::Loop(c) if c.mode == LoopMode::Array && c.input_arrays.is_empty() => {
                Err("array loop needs at least one input array".into())
            }
            NodeConfig::Loop(c) if c.mode == LoopMode::Count && c.count_input.is_none() => {
                Err("count loop needs count_input".into())
            }
            _ => Ok(()),
        }
    }

    /// Whether a run containing this node must keep a checkpoint.
    pub fn requires_checkpoint(&self, node: &NodeSchema) -> bool {
        match self {
            NodeConfig::InputReceiver(_) | NodeConfig::Plugin(_) => true,
            NodeConfig::SubWorkflow(_) => node
                .sub_workflow_schema
                .as_ref()
                .map(|s| s.require_checkpoint())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Chat-history rounds this node reads, if it reads any.
    pub fn chat_history_rounds(&self) -> Option<u32> {
        match self {
            NodeConfig::Llm(c) => ChatHistorySetting::enabled_rounds(c.chat_history.as_ref()),
            NodeConfig::KnowledgeRetriever(c) => {
                ChatHistorySetting::enabled_rounds(c.chat_history.as_ref())
            }
            _ => None,
        }
    }

    /// Build the runnable instance for `node`.
    pub fn build(
        &self,
        node: &NodeSchema,
        ctx: &BuildContext<'_>,
    ) -> WorkflowResult<Arc<dyn NodeExecutor>> {
        let instance: Arc<dyn NodeExecutor> = match self {
            NodeConfig::Entry(c) => Arc::new(nodes::entry::EntryNode::new(node, c.clone())),
            NodeConfig::Exit(c) => Arc::new(nodes::entry::ExitNode::new(node, c.clone())?),
            NodeConfig::Llm(c) => Arc::new(nodes::llm::LlmNode::new(node, c.clone())?),
            NodeConfig::Selector(c) => Arc::new(nodes::selector::SelectorNode::new(c.clone())),
            NodeConfig::KnowledgeRetriever(c) => {
                Arc::new(nodes::knowledge::RetrieverNode::new(c.clone()))
            }
            NodeConfig::KnowledgeIndexer(c) => {
                Arc::new(nodes::knowledge::IndexerNode::new(c.clone()))
            }
            NodeConfig::KnowledgeDeleter(c) => {
                Arc::new(nodes::knowledge::DeleterNode::new(c.clone()))
            }
            NodeConfig::Plugin(c) => Arc::new(nodes::plugin::PluginNode::new(node, c.clone())),
            NodeConfig::InputReceiver(c) => {
                Arc::new(nodes::receiver::InputReceiverNode::new(node, c)?)
            }
            NodeConfig::SubWorkflow(_) => {
                let compiled = ctx.sub_workflow(&node.key).ok_or_else(|| {
                    WorkflowError::CompileError(format!(
                        "sub-workflow '{}' has no embedded schema",
                        node.key
                    ))
                })?;
                Arc::new(nodes::sub_workflow::SubWorkflowNode::new(compiled))
            }
            NodeConfig::Batch(c) => {
                let scope = ctx.scope(&node.key)?;
                Arc::new(nodes::batch::CompositeNodeExecutor::batch(
                    node,
                    c.clone(),
                    scope,
                    ctx.engine_config(),
                ))
            }
            NodeConfig::Loop(c) => {
                let scope = ctx.scope(&node.key)?;
                Arc::new(nodes::batch::CompositeNodeExecutor::looping(
                    node,
                    c.clone(),
                    scope,
                    ctx.engine_config(),
                ))
            }
        };
        Ok(instance)
    }
}

fn parse<T: serde::de::DeserializeOwned>(raw: Value) -> Result<T, String> {
    serde_json::from_value(raw).map_err(|e| e.to_string())
}
