use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use nodeflow::llm::{LlmError, ModelRequest, ModelResponse, StreamChunk, TokenUsage};
use nodeflow::{
    load_workflow, Collaborators, DslFormat, EngineConfig, ExecuteConfig, ExecutionStatus,
    FakeIdGenerator, ModelClient, ModelRegistry, WorkflowCompiler,
};

#[derive(Debug, Deserialize, Default)]
struct StateFile {
    #[serde(default)]
    config: Option<EngineConfig>,
    #[serde(default)]
    execute_config: Option<ExecuteConfig>,
    #[serde(default)]
    fake_id: Option<i64>,
    /// Model name to fake behavior.
    #[serde(default)]
    models: HashMap<String, FakeModel>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FakeModel {
    Echo,
    Reply { text: String },
    Fail { message: String },
}

#[derive(Debug, Deserialize)]
struct ExpectedOutput {
    status: String,
    #[serde(default)]
    outputs: HashMap<String, Value>,
    #[serde(default)]
    partial_match: bool,
    #[serde(default)]
    error_contains: Option<String>,
}

/// Replies with the text of the last message.
pub struct EchoModel;

#[async_trait]
impl ModelClient for EchoModel {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        let content = request
            .messages
            .last()
            .map(|m| m.content.text())
            .unwrap_or_default();
        Ok(reply(content))
    }
}

/// Echoes the prompt one word per fragment.
pub struct WordStreamModel;

#[async_trait]
impl ModelClient for WordStreamModel {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        EchoModel.generate(request).await
    }

    async fn stream(
        &self,
        request: ModelRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ModelResponse, LlmError> {
        let response = self.generate(request).await?;
        let words: Vec<&str> = response.content.split(' ').collect();
        for (i, word) in words.iter().enumerate() {
            let delta = if i + 1 < words.len() {
                format!("{} ", word)
            } else {
                word.to_string()
            };
            chunk_tx
                .send(StreamChunk {
                    delta,
                    finish_reason: None,
                })
                .await
                .map_err(|e| LlmError::StreamError(e.to_string()))?;
        }
        Ok(response)
    }
}

/// Sleeps long enough for a test to cancel the run.
pub struct SlowModel(pub Duration);

#[async_trait]
impl ModelClient for SlowModel {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        tokio::time::sleep(self.0).await;
        EchoModel.generate(request).await
    }
}

struct FixedModel(String);

#[async_trait]
impl ModelClient for FixedModel {
    async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, LlmError> {
        Ok(reply(self.0.clone()))
    }
}

struct FailingModel(String);

#[async_trait]
impl ModelClient for FailingModel {
    async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, LlmError> {
        Err(LlmError::ApiError {
            status: 500,
            message: self.0.clone(),
        })
    }
}

fn reply(content: String) -> ModelResponse {
    ModelResponse {
        content,
        reasoning_content: None,
        usage: TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
        },
        finish_reason: Some("stop".into()),
    }
}

fn read_to_string(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> T {
    let content = read_to_string(path.as_ref());
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse {}: {}", path.as_ref().display(), e))
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> T {
    if path.as_ref().exists() {
        read_json(path)
    } else {
        T::default()
    }
}

/// Log to the test output; `RUST_LOG=nodeflow=debug` shows dispatcher decisions.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn run_case(case_dir: &Path) {
    init_tracing();
    let workflow_yaml = read_to_string(case_dir.join("workflow.yaml"));
    let inputs: HashMap<String, Value> = read_json_or_default(case_dir.join("in.json"));
    let state: StateFile = read_json_or_default(case_dir.join("state.json"));
    let expected: ExpectedOutput = read_json(case_dir.join("out.json"));

    let schema = load_workflow(&workflow_yaml, DslFormat::Yaml)
        .unwrap_or_else(|e| panic!("Failed to load workflow.yaml: {}", e));
    let compiled = WorkflowCompiler::compile(schema, state.config.unwrap_or_default())
        .unwrap_or_else(|e| panic!("Failed to compile {}: {}", case_dir.display(), e));

    let mut models = ModelRegistry::new();
    for (name, fake) in state.models {
        let client: Arc<dyn ModelClient> = match fake {
            FakeModel::Echo => Arc::new(EchoModel),
            FakeModel::Reply { text } => Arc::new(FixedModel(text)),
            FakeModel::Fail { message } => Arc::new(FailingModel(message)),
        };
        models.register(name, client);
    }
    let collaborators = Collaborators::builder()
        .id_generator(Arc::new(FakeIdGenerator::new(state.fake_id.unwrap_or(1000))))
        .models(models)
        .build();

    let handle = compiled
        .runner()
        .inputs(inputs)
        .execute_config(state.execute_config.unwrap_or_default())
        .collaborators(collaborators)
        .run()
        .await
        .unwrap_or_else(|e| panic!("Workflow failed to start: {}", e));

    let status = handle.wait().await;
    match expected.status.as_str() {
        "success" => match status {
            ExecutionStatus::Success(actual_outputs) => {
                if expected.partial_match {
                    for (k, v) in expected.outputs {
                        assert_eq!(actual_outputs.get(&k), Some(&v), "Output mismatch for key '{}'", k);
                    }
                } else {
                    assert_eq!(
                        actual_outputs,
                        expected.outputs,
                        "Outputs mismatch for case: {}",
                        case_dir.display()
                    );
                }
            }
            other => panic!(
                "Expected success but got {:?} for case: {}",
                other,
                case_dir.display()
            ),
        },
        "failed" => match status {
            ExecutionStatus::Failed(error) => {
                if let Some(fragment) = expected.error_contains {
                    assert!(
                        error.contains(&fragment),
                        "Error '{}' does not mention '{}'",
                        error,
                        fragment
                    );
                }
            }
            other => panic!(
                "Expected failure but got {:?} for case: {}",
                other,
                case_dir.display()
            ),
        },
        "interrupted" => assert!(
            matches!(status, ExecutionStatus::Interrupted(_)),
            "Expected interrupt but got {:?}",
            status
        ),
        other => panic!("Unknown expected status '{}'", other),
    }
}
