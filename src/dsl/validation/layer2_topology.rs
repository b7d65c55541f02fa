use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::scope_order;
use crate::schema::{NodeSchema, NodeType, WorkflowSchema};

use super::types::Diagnostic;

/// Per-scope cycles, connections that cross scopes, and top-level reachability.
pub fn validate(schema: &WorkflowSchema) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    let mut scopes: HashMap<Option<&str>, Vec<&NodeSchema>> = HashMap::new();
    for node in &schema.nodes {
        scopes
            .entry(schema.hierarchy.get(&node.key).map(String::as_str))
            .or_default()
            .push(node);
    }

    let mut owners: Vec<&Option<&str>> = scopes.keys().collect();
    owners.sort();
    for owner in owners {
        if let Err(cycle) = scope_order(&scopes[owner], &schema.connections) {
            let message = match owner {
                Some(owner) => format!("{} inside '{}'", cycle, owner),
                None => cycle.to_string(),
            };
            diags.push(Diagnostic::error("E101", message).with_node(cycle.0));
        }
    }

    for conn in &schema.connections {
        let from = schema.hierarchy.get(&conn.from_node);
        let to = schema.hierarchy.get(&conn.to_node);
        let into_child = to == Some(&conn.from_node);
        let out_of_child = from == Some(&conn.to_node);
        if from != to && !into_child && !out_of_child {
            diags.push(
                Diagnostic::error(
                    "E103",
                    format!("connection {} crosses a composite boundary", conn.id()),
                )
                .with_node(&conn.from_node),
            );
        }
    }

    let Some(entry) = schema
        .nodes
        .iter()
        .find(|n| n.node_type == NodeType::Entry && !schema.hierarchy.contains_key(&n.key))
    else {
        return diags;
    };

    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in &schema.connections {
        successors
            .entry(conn.from_node.as_str())
            .or_default()
            .push(conn.to_node.as_str());
    }
    let mut reachable = HashSet::from([entry.key.as_str()]);
    let mut queue = VecDeque::from([entry.key.as_str()]);
    while let Some(key) = queue.pop_front() {
        for next in successors.get(key).into_iter().flatten() {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }
    for node in &schema.nodes {
        if schema.hierarchy.contains_key(&node.key) || reachable.contains(node.key.as_str()) {
            continue;
        }
        diags.push(
            Diagnostic::warning("W101", format!("node '{}' is not reachable from the entry", node.key))
                .with_node(&node.key),
        );
    }

    diags
}
