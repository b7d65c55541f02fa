mod layer1_structure;
mod layer2_topology;
mod layer3_semantic;
mod types;

use crate::schema::WorkflowSchema;

pub use types::{Diagnostic, DiagnosticLevel, ValidationReport};

/// Check a workflow schema, and every embedded sub-workflow, before it is compiled.
///
/// Structural errors that make the graph meaningless (no nodes, duplicate keys,
/// dangling endpoints) stop the later layers from running.
pub fn validate_schema(schema: &WorkflowSchema) -> ValidationReport {
    ValidationReport::from_diagnostics(collect(schema))
}

fn collect(schema: &WorkflowSchema) -> Vec<Diagnostic> {
    let mut diagnostics = layer1_structure::validate(schema);

    let has_fatal_structure = diagnostics.iter().any(|d| {
        d.level == DiagnosticLevel::Error && matches!(d.code.as_str(), "E003" | "E004" | "E005")
    });
    if has_fatal_structure {
        return diagnostics;
    }

    diagnostics.extend(layer2_topology::validate(schema));
    diagnostics.extend(layer3_semantic::validate(schema));

    for node in &schema.nodes {
        let Some(child) = node.sub_workflow_schema.as_deref() else {
            continue;
        };
        for mut d in collect(child) {
            d.message = format!("in sub-workflow '{}': {}", node.key, d.message);
            d.node_key = Some(match d.node_key {
                Some(inner) => format!("{}/{}", node.key, inner),
                None => node.key.clone(),
            });
            diagnostics.push(d);
        }
    }
    diagnostics
}
