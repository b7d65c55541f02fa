use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::api::WorkflowRunnerBuilder;
use crate::core::config::EngineConfig;
use crate::nodes::NodeExecutor;
use crate::schema::{BranchSchema, Connection, NodeKey, NodeSchema, NodeType, WorkflowSchema};

/// A node with its built executor.
#[derive(Clone)]
pub struct ScopeNode {
    pub schema: Arc<NodeSchema>,
    pub executor: Arc<dyn NodeExecutor>,
}

impl fmt::Debug for ScopeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeNode")
            .field("key", &self.schema.key)
            .field("type", &self.schema.node_type)
            .finish()
    }
}

/// One level of a workflow: the top level, or the children of one composite node.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Composite node owning this scope; `None` at the top level.
    pub owner: Option<NodeKey>,
    /// Dependencies first.
    pub nodes: Vec<ScopeNode>,
    /// Control edges with both ends in this scope.
    pub connections: Vec<Connection>,
    pub branches: HashMap<NodeKey, BranchSchema>,
}

impl Scope {
    pub fn node(&self, key: &str) -> Option<&ScopeNode> {
        self.nodes.iter().find(|n| n.schema.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.node(key).is_some()
    }

    pub fn node_of_type(&self, node_type: NodeType) -> Option<&ScopeNode> {
        self.nodes.iter().find(|n| n.schema.node_type == node_type)
    }

    pub fn incoming(&self, key: &str) -> impl Iterator<Item = &Connection> {
        let key = key.to_string();
        self.connections.iter().filter(move |c| c.to_node == key)
    }
}

/// A workflow compiled into runnable scopes. Immutable and shared across runs.
pub struct CompiledWorkflow {
    pub(crate) schema: Arc<WorkflowSchema>,
    pub(crate) top: Arc<Scope>,
    pub(crate) engine_config: Arc<EngineConfig>,
}

impl CompiledWorkflow {
    pub fn schema(&self) -> &Arc<WorkflowSchema> {
        &self.schema
    }

    pub fn top_scope(&self) -> &Arc<Scope> {
        &self.top
    }

    pub fn engine_config(&self) -> &Arc<EngineConfig> {
        &self.engine_config
    }

    /// Key of the node whose output is the workflow's output.
    pub fn exit_key(&self) -> Option<&str> {
        self.top
            .node_of_type(NodeType::Exit)
            .map(|n| n.schema.key.as_str())
    }

    /// Start configuring a run of this workflow.
    pub fn runner(self: &Arc<Self>) -> WorkflowRunnerBuilder {
        WorkflowRunnerBuilder::new(self.clone())
    }
}

impl fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("nodes", &self.schema.nodes.len())
            .field("top", &self.top)
            .finish()
    }
}
