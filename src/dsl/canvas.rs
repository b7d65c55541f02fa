//! Raw graph definition as authored in an editor or a YAML/JSON/TOML file.
//!
//! A [`Canvas`] is nested: composite nodes carry their children in `blocks`
//! with the edges between them, and sub-workflow nodes embed a whole child
//! canvas. [`adapt_canvas`](super::adapter::adapt_canvas) flattens it into a
//! [`WorkflowSchema`](crate::schema::WorkflowSchema).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::config::BatchConfig;
use crate::schema::{ExceptionConfig, StreamConfigs, TypeInfo};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Canvas {
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<CanvasEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: String,
    /// Node type name, e.g. `llm` or `knowledge_retriever`.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub inputs: Vec<CanvasInput>,
    #[serde(default)]
    pub outputs: Vec<CanvasOutput>,
    /// Type-specific settings, adapted by `NodeConfig::adapt`.
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionConfig>,
    /// Children of a batch or loop node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<CanvasNode>,
    /// Edges between `blocks`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<CanvasEdge>,
    /// Run an ordinary node once per array element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_workflow: Option<Box<CanvasSubWorkflow>>,
}

impl CanvasNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            node_type: node_type.into(),
            icon: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            config: Value::Null,
            stream: None,
            exception: None,
            blocks: Vec::new(),
            edges: Vec::new(),
            batch: None,
            sub_workflow: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasEdge {
    pub source: String,
    pub target: String,
    /// Branch port on the source node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TypeInfo>,
    pub value: CanvasValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasOutput {
    pub name: String,
    #[serde(flatten)]
    pub schema: TypeInfo,
    /// Where a composite or exit node takes this output from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CanvasValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasValue {
    Literal(Value),
    Ref {
        node: String,
        #[serde(default)]
        path: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSubWorkflow {
    pub workflow_id: i64,
    #[serde(default)]
    pub version: String,
    pub canvas: Canvas,
}
