use serde_json::json;
use std::sync::Arc;

use nodeflow::schema::config::NodeConfig;
use nodeflow::schema::{FieldMapping, NodeType};
use nodeflow::{
    load_workflow, parse_canvas, validate_schema, CompiledWorkflowCache, DiagnosticLevel,
    DslFormat, EngineConfig, WorkflowError,
};

const YAML: &str = r#"
nodes:
  - id: entry
    type: entry
    title: Start
    outputs:
      - { name: topic, type: string, required: true }
  - id: write
    type: llm
    title: Writer
    inputs:
      - name: topic
        value: { ref: { node: entry, path: [topic] } }
      - name: brief
        schema: { type: file, file_type: doc }
        value: { literal: "https://cdn.example/f/42?token=abc&x-wf-file_name=brief%20v2.pdf" }
    outputs:
      - { name: output, type: string }
    stream: { can_generate_stream: true }
    config:
      model: writer
      user_prompt: "Write about {{topic}} using {{brief}}"
  - id: exit
    type: exit
    title: End
    stream: { require_streaming_input: true }
    inputs:
      - name: text
        value: { ref: { node: write, path: [output] } }
edges:
  - { source: entry, target: write }
  - { source: write, target: exit }
"#;

const TOML: &str = r#"
[[nodes]]
id = "entry"
type = "entry"
title = "Start"
outputs = [{ name = "topic", type = "string", required = true }]

[[nodes]]
id = "write"
type = "llm"
title = "Writer"
outputs = [{ name = "output", type = "string" }]
stream = { can_generate_stream = true }
config = { model = "writer", user_prompt = "Write about {{topic}} using {{brief}}" }

[[nodes.inputs]]
name = "topic"
value = { ref = { node = "entry", path = ["topic"] } }

[[nodes.inputs]]
name = "brief"
schema = { type = "file", file_type = "doc" }
value = { literal = "https://cdn.example/f/42?token=abc&x-wf-file_name=brief%20v2.pdf" }

[[nodes]]
id = "exit"
type = "exit"
title = "End"
stream = { require_streaming_input = true }
inputs = [{ name = "text", value = { ref = { node = "write", path = ["output"] } } }]

[[edges]]
source = "entry"
target = "write"

[[edges]]
source = "write"
target = "exit"
"#;

#[test]
fn test_load_workflow_from_yaml() {
    let schema = load_workflow(YAML, DslFormat::Yaml).unwrap();
    assert_eq!(schema.node_count(), 3);
    let write = schema.get_node("write").unwrap();
    assert_eq!(write.node_type, NodeType::Llm);
    assert_eq!(write.name, "Writer");
    assert!(matches!(&write.configs, NodeConfig::Llm(c) if c.model == "writer"));
    assert!(schema.require_streaming());
    assert!(!schema.require_checkpoint());
}

#[test]
fn test_yaml_and_toml_load_equal_schemas() {
    let a = load_workflow(YAML, DslFormat::Yaml).unwrap();
    let b = load_workflow(TOML, DslFormat::Toml).unwrap();
    assert!(a.is_equal(&b));
    assert!(b.is_equal(&a));
}

#[test]
fn test_is_equal_detects_changes() {
    let a = load_workflow(YAML, DslFormat::Yaml).unwrap();
    let mut b = load_workflow(YAML, DslFormat::Yaml).unwrap();
    b.connections.reverse();
    assert!(a.is_equal(&b));

    let c = load_workflow(&YAML.replace("Write about", "Summarize"), DslFormat::Yaml).unwrap();
    assert!(!a.is_equal(&c));

    let mut d = load_workflow(YAML, DslFormat::Yaml).unwrap();
    d.connections.pop();
    assert!(!a.is_equal(&d));
}

#[test]
fn test_input_file_fields() {
    let schema = load_workflow(YAML, DslFormat::Yaml).unwrap();
    let files = schema.input_file_fields();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_url, "https://cdn.example/f/42?token=abc");
    assert_eq!(files[0].file_name, "brief v2.pdf");
    assert_eq!(files[0].file_extension, ".pdf");
}

#[test]
fn test_invalid_canvas_reports_every_problem() {
    let err = load_workflow(
        r#"
nodes:
  - { id: entry, type: entry }
  - id: exit
    type: exit
    inputs:
      - name: v
        value: { ref: { node: ghost, path: [v] } }
edges:
  - { source: entry, target: exit }
  - { source: exit, target: nowhere }
"#,
        DslFormat::Yaml,
    )
    .unwrap_err();
    let WorkflowError::ValidationFailed(report) = err else {
        panic!("expected validation failure, got {}", err);
    };
    assert!(!report.is_valid);
    let codes: Vec<&str> = report.errors().iter().map(|d| d.code.as_str()).collect();
    assert!(codes.contains(&"E005"), "{:?}", codes);
}

#[test]
fn test_validate_schema_warnings_do_not_fail() {
    let mut schema = load_workflow(YAML, DslFormat::Yaml).unwrap();
    schema.nodes[1].name.clear();
    let report = validate_schema(&schema);
    assert!(report.is_valid);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.level == DiagnosticLevel::Warning && d.code == "W001"));

    schema.nodes[2] = schema.nodes[2]
        .clone()
        .with_input(FieldMapping::reference("late", "missing", &["x"]));
    let report = validate_schema(&schema);
    assert!(!report.is_valid);
    assert!(report.errors().iter().any(|d| d.code == "E201"));
}

#[test]
fn test_parse_canvas_keeps_literals() {
    let canvas = parse_canvas(YAML, DslFormat::Yaml).unwrap();
    let brief = &canvas.nodes[1].inputs[1];
    assert_eq!(brief.name, "brief");
    assert!(matches!(
        &brief.value,
        nodeflow::dsl::CanvasValue::Literal(v) if v == &json!("https://cdn.example/f/42?token=abc&x-wf-file_name=brief%20v2.pdf")
    ));
}

#[test]
fn test_compiled_workflow_cache() {
    let cache = CompiledWorkflowCache::new(EngineConfig::default());
    let schema = load_workflow(YAML, DslFormat::Yaml).unwrap();

    let first = cache.get_or_compile(1, "v1", schema.clone()).unwrap();
    let again = cache.get_or_compile(1, "v1", schema.clone()).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    let changed = load_workflow(&YAML.replace("Write about", "Summarize"), DslFormat::Yaml).unwrap();
    let replaced = cache.get_or_compile(1, "v1", changed).unwrap();
    assert!(!Arc::ptr_eq(&first, &replaced));

    let other_version = cache.get_or_compile(1, "v2", schema).unwrap();
    assert!(!Arc::ptr_eq(&replaced, &other_version));

    let stats = cache.stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 3);

    cache.invalidate_workflow(1);
    assert_eq!(cache.stats().entries, 0);
}
