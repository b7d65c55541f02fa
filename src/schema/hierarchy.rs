//! Relations over the child → parent hierarchy map.
//!
//! These gate which nodes may reference each other's outputs: nodes in the
//! same workflow level, a child reading a top-level node, and parent/child
//! pairs.

use std::collections::HashMap;

use super::types::NodeKey;

pub type Hierarchy = HashMap<NodeKey, NodeKey>;

/// Both nodes sit at the same level: same parent, or neither has one.
/// A missing hierarchy map means everything is top-level.
pub fn is_in_same_workflow(hierarchy: Option<&Hierarchy>, node_key: &str, other: &str) -> bool {
    let Some(hierarchy) = hierarchy else {
        return true;
    };
    match (hierarchy.get(node_key), hierarchy.get(other)) {
        (None, None) => true,
        (Some(mine), Some(theirs)) => mine == theirs,
        _ => false,
    }
}

/// `node_key` is nested in a composite while `other` is top-level.
pub fn is_below_one_level(hierarchy: Option<&Hierarchy>, node_key: &str, other: &str) -> bool {
    let Some(hierarchy) = hierarchy else {
        return false;
    };
    hierarchy.contains_key(node_key) && !hierarchy.contains_key(other)
}

/// `node_key` is the direct parent of `other`.
pub fn is_parent_of(hierarchy: Option<&Hierarchy>, node_key: &str, other: &str) -> bool {
    let Some(hierarchy) = hierarchy else {
        return false;
    };
    hierarchy.get(other).map(|p| p == node_key).unwrap_or(false)
}

/// Whether `node_key` may bind an input to `other`'s output.
pub fn may_reference(hierarchy: Option<&Hierarchy>, node_key: &str, other: &str) -> bool {
    is_in_same_workflow(hierarchy, node_key, other)
        || is_below_one_level(hierarchy, node_key, other)
        || is_parent_of(hierarchy, other, node_key)
        || is_parent_of(hierarchy, node_key, other)
}
