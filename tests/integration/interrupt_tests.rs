use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use nodeflow::service::plugin::{
    ExecuteToolRequest, ToolInterrupt, ToolInterruptKind, ToolResponse,
};
use nodeflow::service::ServiceError;
use nodeflow::{
    load_workflow, CheckpointStore, Collaborators, CompiledWorkflow, DslFormat, EngineConfig,
    ExecuteConfig, ExecutionStatus, FakeIdGenerator, FileCheckpointStore, InterruptEvent,
    InterruptEventType, MemoryCheckpointStore, PluginService, WorkflowCompiler, WorkflowError,
    WorkflowEvent,
};

const FORM_WORKFLOW: &str = r#"
nodes:
  - id: entry
    type: entry
    outputs: [{ name: name, type: string }]
  - id: recv
    type: input_receiver
    outputs: [{ name: field, type: string }]
  - id: exit
    type: exit
    inputs:
      - name: field
        value: { ref: { node: recv, path: [field] } }
      - name: name
        value: { ref: { node: entry, path: [name] } }
edges:
  - { source: entry, target: recv }
  - { source: recv, target: exit }
"#;

const FIELD_ONLY_WORKFLOW: &str = r#"
nodes:
  - id: entry
    type: entry
  - id: recv
    type: input_receiver
    outputs: [{ name: field, type: string }]
  - id: exit
    type: exit
    inputs:
      - name: field
        value: { ref: { node: recv, path: [field] } }
edges:
  - { source: entry, target: recv }
  - { source: recv, target: exit }
"#;

const NESTED_WORKFLOW: &str = r#"
nodes:
  - id: entry
    type: entry
  - id: sub
    type: sub_workflow
    outputs: [{ name: answer, type: string }]
    sub_workflow:
      workflow_id: 3
      canvas:
        nodes:
          - { id: entry, type: entry }
          - id: recv
            type: input_receiver
            outputs: [{ name: answer, type: string }]
          - id: exit
            type: exit
            inputs:
              - name: answer
                value: { ref: { node: recv, path: [answer] } }
        edges:
          - { source: entry, target: recv }
          - { source: recv, target: exit }
  - id: exit
    type: exit
    inputs:
      - name: answer
        value: { ref: { node: sub, path: [answer] } }
edges:
  - { source: entry, target: sub }
  - { source: sub, target: exit }
"#;

const LOOP_WORKFLOW: &str = r#"
nodes:
  - id: entry
    type: entry
    outputs: [{ name: xs, type: array, elem: { type: string } }]
  - id: loop
    type: loop
    inputs: [{ name: xs, value: { ref: { node: entry, path: [xs] } } }]
    outputs:
      - { name: answers, type: array, value: { ref: { node: ask, path: [answer] } } }
    config: { input_arrays: [xs] }
    blocks:
      - id: ask
        type: input_receiver
        outputs: [{ name: answer, type: string }]
  - id: exit
    type: exit
    inputs: [{ name: answers, value: { ref: { node: loop, path: [answers] } } }]
edges:
  - { source: entry, target: loop }
  - { source: loop, target: exit }
"#;

fn compile(yaml: &str) -> Arc<CompiledWorkflow> {
    let schema = load_workflow(yaml, DslFormat::Yaml).unwrap();
    WorkflowCompiler::compile(schema, EngineConfig::default()).unwrap()
}

fn collaborators(store: Arc<dyn CheckpointStore>) -> Collaborators {
    Collaborators::builder()
        .id_generator(Arc::new(FakeIdGenerator::new(9000)))
        .checkpoint_store(store)
        .build()
}

fn with_id(id: i64) -> ExecuteConfig {
    ExecuteConfig {
        id,
        ..Default::default()
    }
}

fn expect_interrupted(status: ExecutionStatus) -> Vec<InterruptEvent> {
    match status {
        ExecutionStatus::Interrupted(events) => events,
        other => panic!("expected interrupt, got {:?}", other),
    }
}

#[tokio::test]
async fn test_receiver_interrupt_then_resume() {
    let compiled = compile(FORM_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());

    let handle = compiled
        .runner()
        .input("name", json!("ada"))
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    assert_eq!(execute_id, 9000);
    let events = expect_interrupted(handle.wait().await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].node_key, "recv");
    assert_eq!(events[0].event_type, InterruptEventType::Input);
    assert!(events[0].interrupt_data.contains("form_schema"));
    assert_eq!(store.len().await, 1);

    let handle = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store.clone()))
        .resume("recv", r#"{"field": "hello"}"#)
        .run()
        .await
        .unwrap();
    let (events, status) = handle.collect().await;
    assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStarted { resumed: true, .. })));
    // entry inputs come back from the checkpoint
    assert_eq!(
        status,
        ExecutionStatus::Success(HashMap::from([
            ("field".to_string(), json!("hello")),
            ("name".to_string(), json!("ada")),
        ]))
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::NodeStarted { node_key, .. } if node_key == "entry")));
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn test_receiver_resume_outputs_exactly_the_form() {
    let compiled = compile(FIELD_ONLY_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    let events = expect_interrupted(handle.wait().await);
    assert_eq!(events.len(), 1);

    let handle = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store.clone()))
        .resume("recv", r#"{"field": "hello"}"#)
        .run()
        .await
        .unwrap();
    assert_eq!(
        handle.wait().await,
        ExecutionStatus::Success(HashMap::from([("field".to_string(), json!("hello"))]))
    );
}

#[tokio::test]
async fn test_second_resume_rejected_while_first_runs() {
    let compiled = compile(FIELD_ONLY_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    expect_interrupted(handle.wait().await);

    let first = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store.clone()))
        .resume("recv", r#"{"field": "one"}"#)
        .run()
        .await
        .unwrap();
    let second = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store.clone()))
        .resume("recv", r#"{"field": "two"}"#)
        .run()
        .await;
    assert!(
        matches!(
            second,
            Err(WorkflowError::NoPendingInterrupt { .. } | WorkflowError::ResumeRejected { .. })
        ),
        "second resume was accepted"
    );

    assert_eq!(
        first.wait().await,
        ExecutionStatus::Success(HashMap::from([("field".to_string(), json!("one"))]))
    );
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn test_rerun_without_resume_replays_same_event() {
    let compiled = compile(FORM_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    let first = expect_interrupted(handle.wait().await);

    let handle = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let second = expect_interrupted(handle.wait().await);
    assert_eq!(first, second);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_resume_by_event_id() {
    let compiled = compile(FORM_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    let event = expect_interrupted(handle.wait().await).remove(0);

    let status = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store))
        .resume(event.id.to_string(), r#"{"field": "by id"}"#)
        .run()
        .await
        .unwrap()
        .wait()
        .await;
    let ExecutionStatus::Success(output) = status else {
        panic!("expected success, got {:?}", status);
    };
    assert_eq!(output["field"], json!("by id"));
}

#[tokio::test]
async fn test_resume_unknown_target_is_rejected() {
    let compiled = compile(FORM_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    expect_interrupted(handle.wait().await);

    let err = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store.clone()))
        .resume("exit", "{}")
        .run()
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        WorkflowError::NoPendingInterrupt { execute_id: id, ref node_key } if id == execute_id && node_key == "exit"
    ));
    // the rejected attempt leaves the checkpoint untouched
    assert_eq!(store.load(execute_id).await.unwrap().unwrap().pending().len(), 1);
}

#[tokio::test]
async fn test_resume_without_checkpoint_is_rejected() {
    let compiled = compile(FORM_WORKFLOW);
    let err = compiled
        .runner()
        .execute_config(with_id(4242))
        .collaborators(collaborators(Arc::new(MemoryCheckpointStore::new())))
        .resume("recv", "{}")
        .run()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WorkflowError::ResumeRejected { execute_id: 4242, .. }));
}

#[tokio::test]
async fn test_second_resume_after_success_is_rejected() {
    let compiled = compile(FORM_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    expect_interrupted(handle.wait().await);

    let resume = || {
        compiled
            .runner()
            .execute_config(with_id(execute_id))
            .collaborators(collaborators(store.clone()))
            .resume("recv", r#"{"field": "once"}"#)
    };
    let status = resume().run().await.unwrap().wait().await;
    assert!(matches!(status, ExecutionStatus::Success(_)));
    let err = resume().run().await.err().unwrap();
    assert!(matches!(err, WorkflowError::ResumeRejected { .. }));
}

#[tokio::test]
async fn test_resume_inside_sub_workflow_by_address() {
    let compiled = compile(NESTED_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    let events = expect_interrupted(handle.wait().await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].node_key, "recv");

    let checkpoint = store.load(execute_id).await.unwrap().unwrap();
    assert!(checkpoint.pending_events.contains_key("sub/recv"));

    let status = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store))
        .resume("sub/recv", r#"{"answer": "deep"}"#)
        .run()
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(
        status,
        ExecutionStatus::Success(HashMap::from([("answer".to_string(), json!("deep"))]))
    );
}

#[tokio::test]
async fn test_loop_interrupts_item_by_item() {
    let compiled = compile(LOOP_WORKFLOW);
    let store = Arc::new(MemoryCheckpointStore::new());
    let handle = compiled
        .runner()
        .input("xs", json!(["a", "b"]))
        .collaborators(collaborators(store.clone()))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    let events = expect_interrupted(handle.wait().await);
    assert_eq!(events.len(), 1);
    let pending = store.load(execute_id).await.unwrap().unwrap().pending_events;
    assert!(pending.contains_key("loop[0]/ask"));

    let resume = |target: &'static str, data: &'static str| {
        compiled
            .runner()
            .execute_config(with_id(execute_id))
            .collaborators(collaborators(store.clone()))
            .resume(target, data)
    };
    let status = resume("loop[0]/ask", r#"{"answer": "first"}"#)
        .run()
        .await
        .unwrap()
        .wait()
        .await;
    expect_interrupted(status);
    let pending = store.load(execute_id).await.unwrap().unwrap().pending_events;
    assert!(pending.contains_key("loop[1]/ask"));

    let status = resume("loop[1]/ask", r#"{"answer": "second"}"#)
        .run()
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(
        status,
        ExecutionStatus::Success(HashMap::from([(
            "answers".to_string(),
            json!(["first", "second"])
        )]))
    );
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let compiled = compile(FORM_WORKFLOW);

    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let handle = compiled
        .runner()
        .input("name", json!("grace"))
        .collaborators(collaborators(store))
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    expect_interrupted(handle.wait().await);
    assert!(dir.path().join(format!("{}.checkpoint.json", execute_id)).exists());

    // a fresh store over the same directory stands in for a new process
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let status = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators(store))
        .resume("recv", r#"{"field": "after restart"}"#)
        .run()
        .await
        .unwrap()
        .wait()
        .await;
    let ExecutionStatus::Success(output) = status else {
        panic!("expected success, got {:?}", status);
    };
    assert_eq!(output["name"], json!("grace"));
    assert_eq!(output["field"], json!("after restart"));
    assert!(!dir.path().join(format!("{}.checkpoint.json", execute_id)).exists());
}

/// Needs authorization on the first call.
#[derive(Default)]
struct OAuthTool {
    calls: Mutex<Vec<bool>>,
}

#[async_trait]
impl PluginService for OAuthTool {
    async fn execute_tool(&self, request: ExecuteToolRequest) -> Result<ToolResponse, ServiceError> {
        self.calls.lock().push(request.options.resumed);
        if request.options.resumed {
            Ok(ToolResponse::Completed {
                result_json: r#"{"data": "authorized"}"#.into(),
            })
        } else {
            Ok(ToolResponse::Interrupted(ToolInterrupt {
                kind: ToolInterruptKind::NeedOAuth,
                data: "https://auth.example/consent".into(),
            }))
        }
    }
}

#[tokio::test]
async fn test_plugin_oauth_interrupt() {
    let compiled = compile(
        r#"
nodes:
  - { id: entry, type: entry }
  - id: tool
    type: plugin
    outputs: [{ name: data, type: string }]
    config: { plugin_id: 1, tool_id: 2 }
  - id: exit
    type: exit
    inputs: [{ name: data, value: { ref: { node: tool, path: [data] } } }]
edges:
  - { source: entry, target: tool }
  - { source: tool, target: exit }
"#,
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let tool = Arc::new(OAuthTool::default());
    let collaborators = Collaborators::builder()
        .id_generator(Arc::new(FakeIdGenerator::new(77)))
        .checkpoint_store(store)
        .plugins(tool.clone())
        .build();

    let handle = compiled
        .runner()
        .collaborators(collaborators.clone())
        .run()
        .await
        .unwrap();
    let execute_id = handle.execute_id();
    let events = expect_interrupted(handle.wait().await);
    assert_eq!(events[0].event_type, InterruptEventType::OauthPlugin);
    assert_eq!(events[0].interrupt_data, "https://auth.example/consent");

    let status = compiled
        .runner()
        .execute_config(with_id(execute_id))
        .collaborators(collaborators)
        .resume("tool", "")
        .run()
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(
        status,
        ExecutionStatus::Success(HashMap::from([("data".to_string(), json!("authorized"))]))
    );
    assert_eq!(*tool.calls.lock(), vec![false, true]);
}
