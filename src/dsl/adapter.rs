//! Flattens a nested [`Canvas`] into a [`WorkflowSchema`].

use std::collections::HashMap;

use super::canvas::{Canvas, CanvasEdge, CanvasNode, CanvasValue};
use super::validation::{validate_schema, Diagnostic, ValidationReport};
use crate::error::{WorkflowError, WorkflowResult};
use crate::schema::config::{BatchConfig, SubWorkflowConfig};
use crate::schema::{
    BranchSchema, Connection, FieldMapping, FieldSource, Hierarchy, NodeConfig, NodeKey, NodeRef,
    NodeSchema, NodeType, SubWorkflowBasic, TypeInfo, WorkflowSchema,
};

/// Suffix of the node a batch-mode node is moved to.
pub const BATCH_INNER_SUFFIX: &str = "_inner";

/// Adapt and validate a canvas.
///
/// Adaptation problems and schema validation errors are reported together in
/// [`WorkflowError::ValidationFailed`].
pub fn adapt_canvas(canvas: &Canvas) -> WorkflowResult<WorkflowSchema> {
    let mut adapter = Adapter::default();
    adapter.add_nodes(&canvas.nodes, None);
    adapter.add_edges(&canvas.edges);
    let (schema, mut diagnostics) = adapter.finish();

    let report = validate_schema(&schema);
    diagnostics.extend(report.diagnostics);
    let report = ValidationReport::from_diagnostics(diagnostics);
    if !report.is_valid {
        return Err(WorkflowError::ValidationFailed(Box::new(report)));
    }
    for warning in report.warnings() {
        tracing::debug!(code = %warning.code, node_key = ?warning.node_key, "{}", warning.message);
    }
    Ok(schema)
}

#[derive(Default)]
struct Adapter {
    nodes: Vec<NodeSchema>,
    connections: Vec<Connection>,
    hierarchy: Hierarchy,
    branches: HashMap<NodeKey, BranchSchema>,
    generated: Vec<NodeKey>,
    diagnostics: Vec<Diagnostic>,
}

impl Adapter {
    fn finish(self) -> (WorkflowSchema, Vec<Diagnostic>) {
        let mut schema = WorkflowSchema::new(self.nodes, self.connections).with_hierarchy(self.hierarchy);
        schema.branches = self.branches;
        schema.generated_nodes = self.generated;
        (schema, self.diagnostics)
    }

    fn add_nodes(&mut self, nodes: &[CanvasNode], parent: Option<&str>) {
        for node in nodes {
            if let Some(schema) = self.adapt_node(node) {
                let key = schema.key.clone();
                match &node.batch {
                    Some(batch) => self.expand_batch_mode(schema, batch, parent),
                    None => self.push(schema, parent),
                }
                if !node.blocks.is_empty() {
                    self.add_nodes(&node.blocks, Some(&key));
                    self.add_edges(&node.edges);
                }
            }
        }
    }

    fn add_edges(&mut self, edges: &[CanvasEdge]) {
        self.connections.extend(edges.iter().map(|e| Connection {
            from_node: e.source.clone(),
            to_node: e.target.clone(),
            from_port: e.source_port.clone(),
        }));
    }

    fn push(&mut self, node: NodeSchema, parent: Option<&str>) {
        if let Some(parent) = parent {
            self.hierarchy.insert(node.key.clone(), parent.to_string());
        }
        self.nodes.push(node);
    }

    fn adapt_node(&mut self, node: &CanvasNode) -> Option<NodeSchema> {
        let node_type = match node.node_type.parse::<NodeType>() {
            Ok(t) => t,
            Err(message) => {
                self.diagnostics.push(
                    Diagnostic::error("E012", message)
                        .with_node(&node.id)
                        .with_field("type"),
                );
                return None;
            }
        };
        if !node.blocks.is_empty() && !node_type.is_composite() {
            self.diagnostics.push(
                Diagnostic::error("E013", format!("{} node '{}' cannot contain blocks", node_type, node.id))
                    .with_node(&node.id),
            );
        }

        let configs = if node_type == NodeType::SubWorkflow {
            let Some(sub) = node.sub_workflow.as_deref() else {
                self.diagnostics.push(
                    Diagnostic::error("E010", format!("sub-workflow '{}' has no embedded canvas", node.id))
                        .with_node(&node.id),
                );
                return None;
            };
            NodeConfig::SubWorkflow(SubWorkflowConfig {
                workflow_id: sub.workflow_id,
                version: sub.version.clone(),
            })
        } else {
            match NodeConfig::adapt(node_type, &node.config) {
                Ok(c) => c,
                Err(message) => {
                    self.diagnostics.push(
                        Diagnostic::error("E014", format!("invalid config for '{}': {}", node.id, message))
                            .with_node(&node.id)
                            .with_field("config"),
                    );
                    return None;
                }
            }
        };

        let mut schema = NodeSchema::new(node.id.clone(), node.title.clone(), configs);
        schema.icon = node.icon.clone();
        schema.stream_configs = node.stream.unwrap_or_default();
        schema.exception_configs = node.exception.clone();
        for input in &node.inputs {
            if let Some(info) = &input.schema {
                schema.input_types.insert(input.name.clone(), info.clone());
            }
            schema.input_sources.push(FieldMapping {
                name: input.name.clone(),
                source: field_source(&input.value),
            });
        }
        for output in &node.outputs {
            schema.output_types.insert(output.name.clone(), output.schema.clone());
            if let Some(value) = &output.value {
                schema.output_sources.push(FieldMapping {
                    name: output.name.clone(),
                    source: field_source(value),
                });
            }
        }

        if let NodeConfig::Selector(c) = &schema.configs {
            self.branches
                .insert(schema.key.clone(), BranchSchema::for_clauses(c.clauses.len()));
        }

        if let Some(sub) = node.sub_workflow.as_deref() {
            let mut child = Adapter::default();
            child.add_nodes(&sub.canvas.nodes, None);
            child.add_edges(&sub.canvas.edges);
            let (child_schema, child_diags) = child.finish();
            self.diagnostics.extend(child_diags.into_iter().map(|mut d| {
                d.message = format!("in sub-workflow '{}': {}", node.id, d.message);
                d.node_key = Some(match d.node_key {
                    Some(inner) => format!("{}/{}", node.id, inner),
                    None => node.id.clone(),
                });
                d
            }));
            schema.sub_workflow_basic = Some(SubWorkflowBasic {
                workflow_id: sub.workflow_id,
                version: sub.version.clone(),
            });
            schema.sub_workflow_schema = Some(Box::new(child_schema));
        }

        Some(schema)
    }

    /// Wrap a node that runs once per array element in a generated batch parent.
    ///
    /// The parent keeps the node's key, bindings and edges; the real node moves to
    /// `<key>_inner` and reads each input from the parent's per-item view.
    fn expand_batch_mode(&mut self, node: NodeSchema, batch: &BatchConfig, parent: Option<&str>) {
        if node.node_type.is_composite()
            || matches!(
                node.node_type,
                NodeType::Entry | NodeType::Exit | NodeType::Selector
            )
        {
            self.diagnostics.push(
                Diagnostic::error("E015", format!("{} node '{}' cannot run in batch mode", node.node_type, node.key))
                    .with_node(&node.key)
                    .with_field("batch"),
            );
            return;
        }

        let key = node.key.clone();
        let inner_key = format!("{}{}", key, BATCH_INNER_SUFFIX);

        let mut wrapper = NodeSchema::new(key.clone(), node.name.clone(), NodeConfig::Batch(batch.clone()));
        wrapper.icon = node.icon.clone();
        wrapper.input_sources = node.input_sources.clone();
        for mapping in &node.input_sources {
            let item = node
                .input_types
                .get(&mapping.name)
                .cloned()
                .unwrap_or_else(TypeInfo::string);
            let info = if batch.input_arrays.contains(&mapping.name) {
                TypeInfo::array_of(item)
            } else {
                item
            };
            wrapper.input_types.insert(mapping.name.clone(), info);
        }
        for (name, info) in &node.output_types {
            wrapper
                .output_types
                .insert(name.clone(), TypeInfo::array_of(info.clone()));
        }
        let mut names: Vec<&String> = node.output_types.keys().collect();
        names.sort();
        wrapper.output_sources = names
            .into_iter()
            .map(|name| FieldMapping::reference(name.clone(), inner_key.clone(), &[name.as_str()]))
            .collect();

        let mut inner = node;
        inner.key = inner_key;
        inner.input_sources = inner
            .input_sources
            .iter()
            .map(|m| FieldMapping::reference(m.name.clone(), key.clone(), &[m.name.as_str()]))
            .collect();

        self.generated.push(key.clone());
        self.push(wrapper, parent);
        self.push(inner, Some(&key));
    }
}

fn field_source(value: &CanvasValue) -> FieldSource {
    match value {
        CanvasValue::Literal(v) => FieldSource::Literal(v.clone()),
        CanvasValue::Ref { node, path } => FieldSource::Ref(NodeRef {
            from_node_key: node.clone(),
            from_path: path.clone(),
        }),
    }
}
