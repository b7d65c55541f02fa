//! Streaming reachability: can any stream producer feed a stream consumer?

use std::collections::{HashMap, HashSet, VecDeque};

use super::node::NodeSchema;

/// Whether the graph must be wired for incremental delivery end to end.
///
/// Data-flow edges come from input bindings: `from -> node` whenever `node`
/// references `from`. One witnessing path is enough.
pub fn require_streaming(nodes: &[NodeSchema]) -> bool {
    let producers: Vec<&str> = nodes
        .iter()
        .filter(|n| n.stream_configs.can_generate_stream)
        .map(|n| n.key.as_str())
        .collect();
    let consumers: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.stream_configs.require_streaming_input)
        .map(|n| n.key.as_str())
        .collect();

    if producers.is_empty() || consumers.is_empty() {
        return false;
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        for mapping in &node.input_sources {
            if let Some(r) = mapping.node_ref() {
                adjacency
                    .entry(r.from_node_key.as_str())
                    .or_default()
                    .push(node.key.as_str());
            }
        }
    }

    producers
        .into_iter()
        .any(|producer| reaches(producer, &adjacency, &consumers))
}

fn reaches(start: &str, adjacency: &HashMap<&str, Vec<&str>>, targets: &HashSet<&str>) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        if targets.contains(current) {
            return true;
        }
        let Some(next) = adjacency.get(current) else {
            continue;
        };
        for &neighbor in next {
            if visited.insert(neighbor) {
                queue.push_back(neighbor);
            }
        }
    }
    false
}
