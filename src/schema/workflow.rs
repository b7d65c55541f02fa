//! The compiled graph and its memoized derived views.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use super::branch::BranchSchema;
use super::hierarchy::{self, Hierarchy};
use super::node::{NodeSchema, NodeType};
use super::streaming;
use super::types::{FieldSource, NodeKey};
use crate::core::execute_config::FileInfo;

/// Query parameter carrying the original file name on uploaded file URLs.
const FILE_NAME_PARAM: &str = "x-wf-file_name";

/// Directed control-flow edge, optionally leaving through a named port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeKey,
    pub to_node: NodeKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<String>,
}

impl Connection {
    pub fn new(from_node: impl Into<String>, to_node: impl Into<String>) -> Self {
        Self {
            from_node: from_node.into(),
            to_node: to_node.into(),
            from_port: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.from_port = Some(port.into());
        self
    }

    pub fn id(&self) -> String {
        match &self.from_port {
            Some(port) => format!("{}:{}:{}", self.from_node, self.to_node, port),
            None => format!("{}:{}", self.from_node, self.to_node),
        }
    }
}

/// A composite parent with the nodes nested directly under it.
#[derive(Debug, Clone)]
pub struct CompositeNode<'a> {
    pub parent: &'a NodeSchema,
    pub children: Vec<&'a NodeSchema>,
}

#[derive(Debug)]
struct Derived {
    node_index: HashMap<NodeKey, usize>,
    composites: Vec<(usize, Vec<usize>)>,
    require_checkpoint: bool,
    require_streaming: bool,
    history_rounds: u32,
}

/// Nodes, connections, hierarchy and branches of one workflow.
///
/// Construction is two-phase: fill the public fields, then call [`init`](Self::init).
/// Derived indices are computed once; accessors initialize on first use.
#[derive(Default, Serialize, Deserialize)]
pub struct WorkflowSchema {
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub hierarchy: Hierarchy,
    #[serde(default)]
    pub branches: HashMap<NodeKey, BranchSchema>,
    /// Nodes synthesized for batch-mode nodes.
    #[serde(default)]
    pub generated_nodes: Vec<NodeKey>,
    #[serde(skip)]
    derived: OnceLock<Derived>,
}

impl Clone for WorkflowSchema {
    fn clone(&self) -> Self {
        // a clone may be edited before use, so indices are rebuilt on demand
        Self {
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
            hierarchy: self.hierarchy.clone(),
            branches: self.branches.clone(),
            generated_nodes: self.generated_nodes.clone(),
            derived: OnceLock::new(),
        }
    }
}

impl fmt::Debug for WorkflowSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowSchema")
            .field("nodes", &self.nodes)
            .field("connections", &self.connections)
            .field("hierarchy", &self.hierarchy)
            .field("branches", &self.branches)
            .field("generated_nodes", &self.generated_nodes)
            .finish()
    }
}

impl WorkflowSchema {
    pub fn new(nodes: Vec<NodeSchema>, connections: Vec<Connection>) -> Self {
        Self {
            nodes,
            connections,
            ..Default::default()
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: Hierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn with_branch(mut self, node_key: impl Into<String>, branch: BranchSchema) -> Self {
        self.branches.insert(node_key.into(), branch);
        self
    }

    /// Build the derived indices. Repeated and concurrent calls are no-ops.
    pub fn init(&self) {
        let _ = self.derived();
    }

    fn derived(&self) -> &Derived {
        self.derived.get_or_init(|| self.compute_derived())
    }

    fn compute_derived(&self) -> Derived {
        let node_index: HashMap<NodeKey, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.key.clone(), i))
            .collect();

        let mut history_rounds = 0u32;
        let mut require_checkpoint = false;
        for node in &self.nodes {
            if let Some(sub) = node.sub_workflow_schema.as_deref() {
                sub.init();
                history_rounds = history_rounds.max(sub.history_rounds());
                require_checkpoint |= sub.require_checkpoint();
            }
            if let Some(rounds) = node.configs.chat_history_rounds() {
                history_rounds = history_rounds.max(rounds);
            }
            require_checkpoint |= node.configs.requires_checkpoint(node);
        }

        Derived {
            composites: group_composites(&self.hierarchy, &node_index),
            node_index,
            require_checkpoint,
            require_streaming: streaming::require_streaming(&self.nodes),
            history_rounds,
        }
    }

    pub fn get_node(&self, key: &str) -> Option<&NodeSchema> {
        self.derived()
            .node_index
            .get(key)
            .and_then(|&i| self.nodes.get(i))
    }

    pub fn get_all_nodes(&self) -> HashMap<&str, &NodeSchema> {
        self.derived()
            .node_index
            .iter()
            .filter_map(|(k, &i)| self.nodes.get(i).map(|n| (k.as_str(), n)))
            .collect()
    }

    pub fn get_branch(&self, key: &str) -> Option<&BranchSchema> {
        self.branches.get(key)
    }

    pub fn get_composite_nodes(&self) -> Vec<CompositeNode<'_>> {
        self.derived()
            .composites
            .iter()
            .map(|(parent, children)| CompositeNode {
                parent: &self.nodes[*parent],
                children: children.iter().map(|&c| &self.nodes[c]).collect(),
            })
            .collect()
    }

    pub fn require_checkpoint(&self) -> bool {
        self.derived().require_checkpoint
    }

    pub fn require_streaming(&self) -> bool {
        self.derived().require_streaming
    }

    /// Largest chat-history window any node needs, including nested sub-workflows.
    pub fn history_rounds(&self) -> u32 {
        self.derived().history_rounds
    }

    /// Number of user-authored nodes; batch-mode expansions are not counted.
    pub fn node_count(&self) -> usize {
        self.nodes.len().saturating_sub(self.generated_nodes.len())
    }

    pub fn parent_of(&self, key: &str) -> Option<&str> {
        self.hierarchy.get(key).map(String::as_str)
    }

    pub fn is_in_same_workflow(&self, node_key: &str, other: &str) -> bool {
        hierarchy::is_in_same_workflow(Some(&self.hierarchy), node_key, other)
    }

    pub fn is_below_one_level(&self, node_key: &str, other: &str) -> bool {
        hierarchy::is_below_one_level(Some(&self.hierarchy), node_key, other)
    }

    pub fn is_parent_of(&self, node_key: &str, other: &str) -> bool {
        hierarchy::is_parent_of(Some(&self.hierarchy), node_key, other)
    }

    /// Top-level node of the given type, if any.
    pub fn top_level_node(&self, node_type: NodeType) -> Option<&NodeSchema> {
        self.nodes
            .iter()
            .find(|n| n.node_type == node_type && !self.hierarchy.contains_key(&n.key))
    }

    /// Structural equality used to decide whether a compiled pipeline can be reused.
    pub fn is_equal(&self, other: &WorkflowSchema) -> bool {
        let mine: HashSet<String> = self.connections.iter().map(Connection::id).collect();
        let theirs: HashSet<String> = other.connections.iter().map(Connection::id).collect();
        if mine != theirs {
            return false;
        }

        let mine: HashMap<&str, &NodeSchema> =
            self.nodes.iter().map(|n| (n.key.as_str(), n)).collect();
        let theirs: HashMap<&str, &NodeSchema> =
            other.nodes.iter().map(|n| (n.key.as_str(), n)).collect();
        if mine.len() != theirs.len() {
            return false;
        }

        mine.iter().all(|(key, node)| match theirs.get(key) {
            Some(other) => nodes_equal(node, other),
            None => false,
        })
    }

    /// File URLs bound as literal inputs anywhere in the workflow.
    pub fn input_file_fields(&self) -> Vec<FileInfo> {
        let mut result = Vec::new();
        for node in &self.nodes {
            for mapping in &node.input_sources {
                let is_file = node
                    .input_types
                    .get(&mapping.name)
                    .map(|t| t.is_file() || t.elem.as_ref().map(|e| e.is_file()).unwrap_or(false))
                    .unwrap_or(false);
                let FieldSource::Literal(value) = &mapping.source else {
                    continue;
                };
                if !is_file {
                    continue;
                }
                match value {
                    Value::String(url) => result.extend(file_info_from_url(url)),
                    Value::Array(urls) => result.extend(
                        urls.iter()
                            .filter_map(Value::as_str)
                            .filter_map(file_info_from_url),
                    ),
                    _ => {}
                }
            }
            if let Some(sub) = node.sub_workflow_schema.as_deref() {
                result.extend(sub.input_file_fields());
            }
        }
        result
    }
}

fn nodes_equal(a: &NodeSchema, b: &NodeSchema) -> bool {
    a.name == b.name
        && a.configs == b.configs
        && a.input_types == b.input_types
        && a.input_sources == b.input_sources
        && a.output_types == b.output_types
        && a.output_sources == b.output_sources
        && a.exception_configs == b.exception_configs
        && a.sub_workflow_basic == b.sub_workflow_basic
}

fn group_composites(
    hierarchy: &Hierarchy,
    index: &HashMap<NodeKey, usize>,
) -> Vec<(usize, Vec<usize>)> {
    let mut by_parent: HashMap<usize, Vec<usize>> = HashMap::new();
    for (child, parent) in hierarchy {
        if let (Some(&c), Some(&p)) = (index.get(child), index.get(parent)) {
            by_parent.entry(p).or_default().push(c);
        }
    }
    let mut composites: Vec<(usize, Vec<usize>)> = by_parent
        .into_iter()
        .map(|(p, mut children)| {
            children.sort_unstable();
            (p, children)
        })
        .collect();
    composites.sort_by_key(|(p, _)| *p);
    composites
}

/// Strip the file-name query parameter from an uploaded file URL, keeping the name.
pub(crate) fn file_info_from_url(raw: &str) -> Option<FileInfo> {
    let (base, query) = raw.split_once('?')?;
    let mut file_name = None;
    let mut kept = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((FILE_NAME_PARAM, value)) => file_name = Some(percent_decode(value)),
            _ => kept.push(pair),
        }
    }
    let file_name = file_name?;
    let file_url = if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    };
    let file_extension = std::path::Path::new(file_name.trim())
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    Some(FileInfo {
        file_url,
        file_name,
        file_extension,
    })
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
