use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::dsl::validation::validate_schema;
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::scope_order;
use crate::schema::{NodeKey, NodeSchema, NodeType, WorkflowSchema};

use super::compiled_workflow::{CompiledWorkflow, Scope, ScopeNode};

/// What node builders may look up while a workflow is being compiled.
pub struct BuildContext<'a> {
    scopes: &'a HashMap<NodeKey, Arc<Scope>>,
    sub_workflows: &'a HashMap<NodeKey, Arc<CompiledWorkflow>>,
    engine_config: &'a Arc<EngineConfig>,
}

impl<'a> BuildContext<'a> {
    /// Child scope of the composite `key`, which is always built before its owner.
    pub fn scope(&self, key: &str) -> WorkflowResult<Arc<Scope>> {
        self.scopes
            .get(key)
            .cloned()
            .ok_or_else(|| WorkflowError::CompileError(format!("composite '{}' has no child scope", key)))
    }

    pub fn sub_workflow(&self, key: &str) -> Option<Arc<CompiledWorkflow>> {
        self.sub_workflows.get(key).cloned()
    }

    pub fn engine_config(&self) -> &Arc<EngineConfig> {
        self.engine_config
    }
}

pub struct WorkflowCompiler;

impl WorkflowCompiler {
    /// Validate a schema and compile it into runnable scopes.
    pub fn compile(schema: WorkflowSchema, engine_config: EngineConfig) -> WorkflowResult<Arc<CompiledWorkflow>> {
        Self::compile_shared(schema, Arc::new(engine_config))
    }

    fn compile_shared(
        schema: WorkflowSchema,
        engine_config: Arc<EngineConfig>,
    ) -> WorkflowResult<Arc<CompiledWorkflow>> {
        let report = validate_schema(&schema);
        if !report.is_valid {
            return Err(WorkflowError::ValidationFailed(Box::new(report)));
        }
        for warning in report.warnings() {
            tracing::warn!(code = %warning.code, node_key = ?warning.node_key, "{}", warning.message);
        }
        schema.init();

        let mut sub_workflows = HashMap::new();
        for node in &schema.nodes {
            if node.node_type != NodeType::SubWorkflow {
                continue;
            }
            let child = node.sub_workflow_schema.as_deref().ok_or_else(|| {
                WorkflowError::CompileError(format!("sub-workflow '{}' has no embedded schema", node.key))
            })?;
            let compiled = Self::compile_shared(child.clone(), engine_config.clone())?;
            sub_workflows.insert(node.key.clone(), compiled);
        }

        let mut members: HashMap<Option<&str>, Vec<&NodeSchema>> = HashMap::new();
        for node in &schema.nodes {
            members
                .entry(schema.parent_of(&node.key))
                .or_default()
                .push(node);
        }

        let mut scopes: HashMap<NodeKey, Arc<Scope>> = HashMap::new();
        for owner in composites_deepest_first(&schema) {
            let children = members.get(&Some(owner)).cloned().unwrap_or_default();
            let scope = {
                let ctx = BuildContext {
                    scopes: &scopes,
                    sub_workflows: &sub_workflows,
                    engine_config: &engine_config,
                };
                build_scope(&schema, Some(owner), &children, &ctx)?
            };
            scopes.insert(owner.to_string(), Arc::new(scope));
        }

        let top_nodes = members.get(&None).cloned().unwrap_or_default();
        let ctx = BuildContext {
            scopes: &scopes,
            sub_workflows: &sub_workflows,
            engine_config: &engine_config,
        };
        let top = build_scope(&schema, None, &top_nodes, &ctx)?;

        tracing::debug!(
            nodes = schema.node_count(),
            composites = scopes.len(),
            sub_workflows = sub_workflows.len(),
            "workflow compiled"
        );
        Ok(Arc::new(CompiledWorkflow {
            schema: Arc::new(schema),
            top: Arc::new(top),
            engine_config,
        }))
    }
}

/// Keys of composite nodes, children before parents.
fn composites_deepest_first(schema: &WorkflowSchema) -> Vec<&str> {
    let depth = |key: &str| {
        let mut depth = 0;
        let mut current = key;
        while let Some(parent) = schema.parent_of(current) {
            depth += 1;
            current = parent;
        }
        depth
    };
    let mut composites: Vec<(usize, &str)> = schema
        .nodes
        .iter()
        .filter(|n| n.node_type.is_composite())
        .map(|n| (depth(&n.key), n.key.as_str()))
        .collect();
    composites.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    composites.into_iter().map(|(_, key)| key).collect()
}

fn build_scope(
    schema: &WorkflowSchema,
    owner: Option<&str>,
    nodes: &[&NodeSchema],
    ctx: &BuildContext<'_>,
) -> WorkflowResult<Scope> {
    let order = scope_order(nodes, &schema.connections).map_err(|e| {
        WorkflowError::CompileError(match owner {
            Some(owner) => format!("{} inside '{}'", e, owner),
            None => e.to_string(),
        })
    })?;

    let keys: HashSet<&str> = nodes.iter().map(|n| n.key.as_str()).collect();
    let mut scope_nodes = Vec::with_capacity(order.len());
    for key in &order {
        let node = schema
            .get_node(key)
            .ok_or_else(|| WorkflowError::NodeNotFound(key.clone()))?;
        let executor = node.configs.build(node, ctx)?;
        scope_nodes.push(ScopeNode {
            schema: Arc::new(node.clone()),
            executor,
        });
    }

    Ok(Scope {
        owner: owner.map(str::to_string),
        nodes: scope_nodes,
        connections: schema
            .connections
            .iter()
            .filter(|c| keys.contains(c.from_node.as_str()) && keys.contains(c.to_node.as_str()))
            .cloned()
            .collect(),
        branches: schema
            .branches
            .iter()
            .filter(|(k, _)| keys.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
}
