use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::config::NodeConfig;
use super::types::{FieldMapping, NodeKey, TypeInfo};
use super::workflow::WorkflowSchema;

/// Closed set of node kinds the orchestrator knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Entry,
    Exit,
    Llm,
    Selector,
    KnowledgeRetriever,
    KnowledgeIndexer,
    KnowledgeDeleter,
    Plugin,
    InputReceiver,
    SubWorkflow,
    Batch,
    Loop,
}

impl NodeType {
    pub const ALL: [NodeType; 12] = [
        NodeType::Entry,
        NodeType::Exit,
        NodeType::Llm,
        NodeType::Selector,
        NodeType::KnowledgeRetriever,
        NodeType::KnowledgeIndexer,
        NodeType::KnowledgeDeleter,
        NodeType::Plugin,
        NodeType::InputReceiver,
        NodeType::SubWorkflow,
        NodeType::Batch,
        NodeType::Loop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Entry => "entry",
            NodeType::Exit => "exit",
            NodeType::Llm => "llm",
            NodeType::Selector => "selector",
            NodeType::KnowledgeRetriever => "knowledge_retriever",
            NodeType::KnowledgeIndexer => "knowledge_indexer",
            NodeType::KnowledgeDeleter => "knowledge_deleter",
            NodeType::Plugin => "plugin",
            NodeType::InputReceiver => "input_receiver",
            NodeType::SubWorkflow => "sub_workflow",
            NodeType::Batch => "batch",
            NodeType::Loop => "loop",
        }
    }

    /// Composite nodes own a nested child subgraph through the hierarchy map.
    pub fn is_composite(&self) -> bool {
        matches!(self, NodeType::Batch | NodeType::Loop)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown node type '{}'", s))
    }
}

/// Streaming capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfigs {
    #[serde(default)]
    pub can_generate_stream: bool,
    #[serde(default)]
    pub require_streaming_input: bool,
}

/// What to do when a node invocation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorProcessType {
    #[default]
    Throw,
    ReturnDefault,
}

/// Per-node exception handling, opt-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionConfig {
    #[serde(default)]
    pub max_retry: u32,
    #[serde(default)]
    pub process_type: ErrorProcessType,
    /// JSON object used as output when `process_type` is `return_default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_on_err: Option<String>,
}

/// Identity of the workflow a sub-workflow node embeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWorkflowBasic {
    pub workflow_id: i64,
    #[serde(default)]
    pub version: String,
}

/// Typed description of one graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSchema {
    pub key: NodeKey,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub input_types: HashMap<String, TypeInfo>,
    #[serde(default)]
    pub input_sources: Vec<FieldMapping>,
    #[serde(default)]
    pub output_types: HashMap<String, TypeInfo>,
    /// Output bindings, used by exit and composite nodes to pick values from other nodes.
    #[serde(default)]
    pub output_sources: Vec<FieldMapping>,
    #[serde(default)]
    pub stream_configs: StreamConfigs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_configs: Option<ExceptionConfig>,
    pub configs: NodeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_workflow_basic: Option<SubWorkflowBasic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_workflow_schema: Option<Box<WorkflowSchema>>,
}

impl NodeSchema {
    /// Build a schema with empty bindings; the node type follows the config variant.
    pub fn new(key: impl Into<String>, name: impl Into<String>, configs: NodeConfig) -> Self {
        Self {
            key: key.into(),
            node_type: configs.node_type(),
            name: name.into(),
            icon: None,
            input_types: HashMap::new(),
            input_sources: Vec::new(),
            output_types: HashMap::new(),
            output_sources: Vec::new(),
            stream_configs: StreamConfigs::default(),
            exception_configs: None,
            configs,
            sub_workflow_basic: None,
            sub_workflow_schema: None,
        }
    }

    pub fn with_input(mut self, mapping: FieldMapping) -> Self {
        self.input_sources.push(mapping);
        self
    }

    pub fn with_input_type(mut self, name: impl Into<String>, info: TypeInfo) -> Self {
        self.input_types.insert(name.into(), info);
        self
    }

    pub fn with_output_type(mut self, name: impl Into<String>, info: TypeInfo) -> Self {
        self.output_types.insert(name.into(), info);
        self
    }

    pub fn with_output_source(mut self, mapping: FieldMapping) -> Self {
        self.output_sources.push(mapping);
        self
    }

    pub fn with_stream(mut self, stream: StreamConfigs) -> Self {
        self.stream_configs = stream;
        self
    }

    /// Keys of nodes whose outputs this node reads, in binding order, without duplicates.
    pub fn referenced_nodes(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for mapping in self.input_sources.iter().chain(self.output_sources.iter()) {
            if let Some(r) = mapping.node_ref() {
                if !seen.contains(&r.from_node_key.as_str()) {
                    seen.push(r.from_node_key.as_str());
                }
            }
        }
        seen
    }

    /// Default output used when exception handling swallows a failure.
    pub fn default_error_output(&self) -> Option<HashMap<String, Value>> {
        let config = self.exception_configs.as_ref()?;
        if config.process_type != ErrorProcessType::ReturnDefault {
            return None;
        }
        let mut output = match config.data_on_err.as_deref() {
            Some(raw) => serde_json::from_str::<HashMap<String, Value>>(raw).unwrap_or_default(),
            None => HashMap::new(),
        };
        for name in self.output_types.keys() {
            output.entry(name.clone()).or_insert(Value::Null);
        }
        Some(output)
    }
}
