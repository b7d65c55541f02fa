use std::collections::HashSet;

use crate::schema::{NodeType, WorkflowSchema};

use super::types::Diagnostic;

/// Keys, endpoints, hierarchy shape and the top-level entry/exit pair.
pub fn validate(schema: &WorkflowSchema) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    if schema.nodes.is_empty() {
        diags.push(Diagnostic::error("E003", "workflow has no nodes"));
        return diags;
    }

    let mut keys = HashSet::new();
    let mut duplicates = Vec::new();
    for node in &schema.nodes {
        if node.key.trim().is_empty() {
            diags.push(Diagnostic::error("E009", "node key is empty").with_field("key"));
            continue;
        }
        if !keys.insert(node.key.as_str()) && !duplicates.contains(&node.key.as_str()) {
            duplicates.push(node.key.as_str());
        }
        if node.name.trim().is_empty() {
            diags.push(
                Diagnostic::warning("W001", format!("node '{}' has no title", node.key))
                    .with_node(&node.key)
                    .with_field("name"),
            );
        }
        if node.node_type != node.configs.node_type() {
            diags.push(
                Diagnostic::error(
                    "E011",
                    format!(
                        "node '{}' is a {} but carries {} config",
                        node.key,
                        node.node_type,
                        node.configs.node_type()
                    ),
                )
                .with_node(&node.key),
            );
        }
        if node.node_type == NodeType::SubWorkflow && node.sub_workflow_schema.is_none() {
            diags.push(
                Diagnostic::error(
                    "E010",
                    format!("sub-workflow '{}' has no embedded schema", node.key),
                )
                .with_node(&node.key),
            );
        }
    }
    for dup in duplicates {
        diags.push(Diagnostic::error("E004", format!("duplicate node key '{}'", dup)).with_node(dup));
    }

    for conn in &schema.connections {
        for (end, key) in [("from", &conn.from_node), ("to", &conn.to_node)] {
            if !keys.contains(key.as_str()) {
                diags.push(
                    Diagnostic::error(
                        "E005",
                        format!("connection {} references unknown node '{}'", conn.id(), key),
                    )
                    .with_field(format!("connections.{}", end)),
                );
            }
        }
    }

    for (child, parent) in &schema.hierarchy {
        if !keys.contains(child.as_str()) {
            diags.push(Diagnostic::error(
                "E006",
                format!("hierarchy lists unknown node '{}'", child),
            ));
            continue;
        }
        match schema.nodes.iter().find(|n| &n.key == parent) {
            None => diags.push(
                Diagnostic::error("E006", format!("parent '{}' of '{}' does not exist", parent, child))
                    .with_node(child),
            ),
            Some(p) if !p.node_type.is_composite() => diags.push(
                Diagnostic::error(
                    "E006",
                    format!("parent '{}' of '{}' is not a batch or loop node", parent, child),
                )
                .with_node(child),
            ),
            Some(_) => {}
        }
    }

    for (code, required) in [("E007", NodeType::Entry), ("E008", NodeType::Exit)] {
        let top_level: Vec<&str> = schema
            .nodes
            .iter()
            .filter(|n| n.node_type == required && !schema.hierarchy.contains_key(&n.key))
            .map(|n| n.key.as_str())
            .collect();
        match top_level.len() {
            0 => diags.push(Diagnostic::error(code, format!("workflow has no {} node", required))),
            1 => {}
            n => diags.push(Diagnostic::error(
                code,
                format!("workflow has {} {} nodes: {}", n, required, top_level.join(", ")),
            )),
        }
    }

    diags
}
