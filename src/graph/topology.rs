//! Per-scope dependency graph: control edges plus data references between
//! nodes of the same scope.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::schema::{Connection, NodeKey, NodeSchema};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cycle through node '{0}'")]
pub struct CycleError(pub NodeKey);

/// Nodes of one scope in an order where every dependency comes first.
///
/// Edges with an endpoint outside the scope are ignored, so a composite's
/// own edges into its children do not count.
pub fn scope_order(nodes: &[&NodeSchema], connections: &[Connection]) -> Result<Vec<NodeKey>, CycleError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::with_capacity(nodes.len(), connections.len());
    let index: HashMap<&str, NodeIndex> = nodes
        .iter()
        .map(|n| (n.key.as_str(), graph.add_node(n.key.as_str())))
        .collect();

    for conn in connections {
        if let (Some(&from), Some(&to)) = (
            index.get(conn.from_node.as_str()),
            index.get(conn.to_node.as_str()),
        ) {
            graph.update_edge(from, to, ());
        }
    }
    for node in nodes {
        let to = index[node.key.as_str()];
        for dep in node.referenced_nodes() {
            if let Some(&from) = index.get(dep) {
                graph.update_edge(from, to, ());
            }
        }
    }

    toposort(&graph, None)
        .map(|order| order.into_iter().map(|i| graph[i].to_string()).collect())
        .map_err(|cycle| CycleError(graph[cycle.node_id()].to_string()))
}
