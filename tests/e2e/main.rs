#[macro_use]
mod macros;
mod runner;

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use nodeflow::core::execute_config::SyncPattern;
use nodeflow::{
    load_workflow, Collaborators, DslFormat, EngineConfig, ExecuteConfig, ExecutionStatus,
    FakeIdGenerator, ModelClient, ModelRegistry, WorkflowCompiler, WorkflowEvent,
};
use runner::{EchoModel, SlowModel, WordStreamModel};

e2e_test_cases!("tests/e2e/cases",
    case_llm_echo => "llm_echo",
    case_selector_branch => "selector_branch",
    case_batch_mode_llm => "batch_mode_llm",
    case_loop_over_array => "loop_over_array",
    case_sub_workflow => "sub_workflow",
    case_exception_return_default => "exception_return_default",
    case_entry_default_values => "entry_default_values",
    case_missing_required_input => "missing_required_input",
    case_answer_content_exit => "answer_content_exit",
);

const ECHO_WORKFLOW: &str = r#"
nodes:
  - id: entry
    type: entry
    outputs: [{ name: x, type: string }]
  - id: llm
    type: llm
    inputs: [{ name: x, value: { ref: { node: entry, path: [x] } } }]
    outputs: [{ name: output, type: string }]
    stream: { can_generate_stream: true }
    config: { model: m, user_prompt: "say {{x}} now" }
  - id: exit
    type: exit
    inputs: [{ name: answer, value: { ref: { node: llm, path: [output] } } }]
edges:
  - { source: entry, target: llm }
  - { source: llm, target: exit }
"#;

fn collaborators(model: Arc<dyn ModelClient>) -> Collaborators {
    Collaborators::builder()
        .id_generator(Arc::new(FakeIdGenerator::new(500)))
        .models(ModelRegistry::new().with("m", model))
        .build()
}

fn compile(config: EngineConfig) -> Arc<nodeflow::CompiledWorkflow> {
    let schema = load_workflow(ECHO_WORKFLOW, DslFormat::Yaml).unwrap();
    WorkflowCompiler::compile(schema, config).unwrap()
}

#[tokio::test]
async fn test_events_are_ordered() {
    let compiled = compile(EngineConfig::default());
    let handle = compiled
        .runner()
        .input("x", json!("hi"))
        .collaborators(collaborators(Arc::new(EchoModel)))
        .run()
        .await
        .unwrap();
    assert_eq!(handle.execute_id(), 500);

    let (events, status) = handle.collect().await;
    assert_eq!(status, ExecutionStatus::Success([("answer".to_string(), json!("say hi now"))].into()));
    assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStarted { resumed: false, .. })));
    assert!(events.last().unwrap().is_terminal());
    assert!(events.iter().all(|e| e.execute_id() == 500));

    let started: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::NodeStarted { node_key, .. } => Some(node_key.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["entry", "llm", "exit"]);

    let llm_started = events
        .iter()
        .position(|e| matches!(e, WorkflowEvent::NodeStarted { node_key, .. } if node_key == "llm"))
        .unwrap();
    let llm_finished = events
        .iter()
        .position(|e| matches!(e, WorkflowEvent::NodeFinished { node_key, .. } if node_key == "llm"))
        .unwrap();
    assert!(llm_started < llm_finished);
    // not streaming unless asked
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::NodeStreamDelta { .. })));
}

#[tokio::test]
async fn test_stream_deltas_follow_model_fragments() {
    let compiled = compile(EngineConfig::default());
    let handle = compiled
        .runner()
        .input("x", json!("hi"))
        .execute_config(ExecuteConfig {
            sync_pattern: SyncPattern::Stream,
            ..Default::default()
        })
        .collaborators(collaborators(Arc::new(WordStreamModel)))
        .run()
        .await
        .unwrap();

    let events: Vec<WorkflowEvent> = handle.into_event_stream().collect().await;
    let deltas: Vec<(String, usize)> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::NodeStreamDelta { delta, index, .. } => Some((delta.clone(), *index)),
            _ => None,
        })
        .collect();
    assert_eq!(
        deltas,
        vec![("say ".to_string(), 0), ("hi ".to_string(), 1), ("now".to_string(), 2)]
    );
    assert!(matches!(
        events.last(),
        Some(WorkflowEvent::WorkflowSucceeded { output, .. }) if output["answer"] == json!("say hi now")
    ));
}

#[tokio::test]
async fn test_cancel_running_workflow() {
    let compiled = compile(EngineConfig::default());
    let handle = compiled
        .runner()
        .input("x", json!("hi"))
        .collaborators(collaborators(Arc::new(SlowModel(Duration::from_secs(30)))))
        .run()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.cancel());
    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancel did not stop the run");
    assert_eq!(status, ExecutionStatus::Canceled);
}

#[tokio::test]
async fn test_cancel_refused_when_not_cancellable() {
    let compiled = compile(EngineConfig::default());
    let handle = compiled
        .runner()
        .input("x", json!("hi"))
        .execute_config(ExecuteConfig {
            cancellable: false,
            ..Default::default()
        })
        .collaborators(collaborators(Arc::new(SlowModel(Duration::from_millis(20)))))
        .run()
        .await
        .unwrap();

    assert!(!handle.cancel());
    assert!(matches!(handle.wait().await, ExecutionStatus::Success(_)));
}

#[tokio::test]
async fn test_wait_does_not_block_on_full_event_buffer() {
    let compiled = compile(EngineConfig {
        event_buffer: 1,
        ..Default::default()
    });
    let handle = compiled
        .runner()
        .input("x", json!("hi"))
        .collaborators(collaborators(Arc::new(EchoModel)))
        .run()
        .await
        .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("run stalled on an unread event");
    assert!(matches!(status, ExecutionStatus::Success(_)));
}

#[tokio::test]
async fn test_missing_model_fails_run() {
    let compiled = compile(EngineConfig::default());
    let handle = compiled
        .runner()
        .input("x", json!("hi"))
        .collaborators(
            Collaborators::builder()
                .id_generator(Arc::new(FakeIdGenerator::new(1)))
                .build(),
        )
        .run()
        .await
        .unwrap();

    let (events, status) = handle.collect().await;
    let ExecutionStatus::Failed(error) = status else {
        panic!("expected failure, got {:?}", status);
    };
    assert!(error.contains("node=llm"), "{}", error);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::NodeFailed { node_key, .. } if node_key == "llm")));
    assert!(matches!(events.last(), Some(WorkflowEvent::WorkflowFailed { .. })));
}
