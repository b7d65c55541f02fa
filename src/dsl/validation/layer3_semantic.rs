use std::collections::HashSet;

use crate::schema::config::{LoopMode, OutputFormat};
use crate::schema::hierarchy::may_reference;
use crate::schema::{NodeConfig, NodeType, WorkflowSchema};

use super::types::Diagnostic;

/// References, branch ports and per-kind field requirements.
pub fn validate(schema: &WorkflowSchema) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let keys: HashSet<&str> = schema.nodes.iter().map(|n| n.key.as_str()).collect();

    for node in &schema.nodes {
        let bindings = node
            .input_sources
            .iter()
            .map(|m| ("inputs", m))
            .chain(node.output_sources.iter().map(|m| ("outputs", m)));
        for (section, mapping) in bindings {
            let Some(r) = mapping.node_ref() else {
                continue;
            };
            let field = format!("{}.{}", section, mapping.name);
            if !keys.contains(r.from_node_key.as_str()) {
                diags.push(
                    Diagnostic::error(
                        "E201",
                        format!("'{}' references unknown node '{}'", node.key, r.from_node_key),
                    )
                    .with_node(&node.key)
                    .with_field(field),
                );
            } else if !may_reference(Some(&schema.hierarchy), &node.key, &r.from_node_key) {
                diags.push(
                    Diagnostic::error(
                        "E202",
                        format!("'{}' cannot read outputs of '{}'", node.key, r.from_node_key),
                    )
                    .with_node(&node.key)
                    .with_field(field),
                );
            }
        }

        let declared: HashSet<&str> = node.input_sources.iter().map(|m| m.name.as_str()).collect();
        let arrays = match &node.configs {
            NodeConfig::Batch(c) => c.input_arrays.as_slice(),
            NodeConfig::Loop(c) if c.mode == LoopMode::Array => c.input_arrays.as_slice(),
            _ => &[][..],
        };
        for name in arrays {
            if !declared.contains(name.as_str()) {
                diags.push(
                    Diagnostic::error(
                        "E206",
                        format!("'{}' iterates over undeclared input '{}'", node.key, name),
                    )
                    .with_node(&node.key)
                    .with_field(format!("inputs.{}", name)),
                );
            }
        }
        if let NodeConfig::Loop(c) = &node.configs {
            if let Some(count) = c.count_input.as_deref().filter(|_| c.mode == LoopMode::Count) {
                if !declared.contains(count) {
                    diags.push(
                        Diagnostic::error(
                            "E206",
                            format!("'{}' counts with undeclared input '{}'", node.key, count),
                        )
                        .with_node(&node.key)
                        .with_field(format!("inputs.{}", count)),
                    );
                }
            }
        }

        if let NodeConfig::Llm(c) = &node.configs {
            if c.output_format == OutputFormat::Json && node.output_types.is_empty() {
                diags.push(
                    Diagnostic::error(
                        "E205",
                        format!("'{}' produces JSON but declares no output types", node.key),
                    )
                    .with_node(&node.key)
                    .with_field("outputs"),
                );
            }
        }
        if node.node_type == NodeType::InputReceiver && node.output_types.is_empty() {
            diags.push(
                Diagnostic::warning("W201", format!("'{}' asks for an empty form", node.key))
                    .with_node(&node.key),
            );
        }
        if node.node_type == NodeType::Selector && schema.get_branch(&node.key).is_none() {
            diags.push(
                Diagnostic::error("E204", format!("selector '{}' has no branch ports", node.key))
                    .with_node(&node.key),
            );
        }
    }

    for key in schema.branches.keys() {
        if !keys.contains(key.as_str()) {
            diags.push(Diagnostic::error("E203", format!("branch for unknown node '{}'", key)));
        }
    }
    for conn in &schema.connections {
        let Some(port) = conn.from_port.as_deref() else {
            continue;
        };
        let valid = schema
            .get_branch(&conn.from_node)
            .map(|b| b.has_port(port))
            .unwrap_or(false);
        if !valid {
            diags.push(
                Diagnostic::error(
                    "E203",
                    format!("connection {} leaves through unknown port '{}'", conn.id(), port),
                )
                .with_node(&conn.from_node),
            );
        }
    }

    diags
}
