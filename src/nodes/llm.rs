//! LLM node: renders prompts, calls a registered model and shapes its reply.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::executor::NodeExecutor;
use crate::core::callback::{concat_callback_outputs, StructuredCallbackOutput};
use crate::core::event_bus::WorkflowEvent;
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{NodeOutcome, NodeOutput};
use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
use crate::llm::{
    ChatRole, ContentPart, Message, MessageContent, ModelCapabilities, ModelClient, ModelRequest,
    ModelResponse, StreamChunk,
};
use crate::schema::config::{ChatHistorySetting, LlmConfig, OutputFormat};
use crate::schema::{convert_fields, DataType, FileSubType, NodeSchema, TypeInfo};
use crate::template::TemplateEngine;

/// Output holding the model's reasoning, when the node declares it.
pub const REASONING_OUTPUT: &str = "reasoning_content";
const DEFAULT_TEXT_OUTPUT: &str = "output";

pub struct LlmNode {
    config: LlmConfig,
    input_types: HashMap<String, TypeInfo>,
    output_types: HashMap<String, TypeInfo>,
    can_stream: bool,
}

impl LlmNode {
    pub fn new(node: &NodeSchema, config: LlmConfig) -> WorkflowResult<Self> {
        let engine = TemplateEngine::shared();
        let prompts = std::iter::once(config.user_prompt.as_str()).chain(config.system_prompt.as_deref());
        for prompt in prompts {
            engine
                .check(prompt)
                .map_err(|e| WorkflowError::CompileError(format!("llm '{}': {}", node.key, e)))?;
        }
        Ok(Self {
            config,
            input_types: node.input_types.clone(),
            output_types: node.output_types.clone(),
            can_stream: node.stream_configs.can_generate_stream,
        })
    }

    fn text_output_name(&self) -> &str {
        let mut names = self
            .output_types
            .iter()
            .filter(|(name, info)| name.as_str() != REASONING_OUTPUT && info.data_type == DataType::String)
            .map(|(name, _)| name.as_str());
        match (names.next(), names.next()) {
            (Some(only), None) => only,
            _ => DEFAULT_TEXT_OUTPUT,
        }
    }

    fn build_messages(
        &self,
        input: &HashMap<String, Value>,
        capabilities: ModelCapabilities,
        ctx: &ExecutionContext,
    ) -> NodeResult<Vec<Message>> {
        let engine = TemplateEngine::shared();
        let mut messages = Vec::new();
        if let Some(system) = &self.config.system_prompt {
            messages.push(Message::text(ChatRole::System, engine.render(system, input)?));
        }
        if let Some(rounds) = ChatHistorySetting::enabled_rounds(self.config.chat_history.as_ref()) {
            messages.extend(
                ctx.chat_history(rounds)
                    .into_iter()
                    .map(|m| Message::text(m.role, m.content)),
            );
        }

        let prompt = engine.render(&self.config.user_prompt, input)?;
        let files = self.file_parts(input, capabilities);
        let content = if files.is_empty() {
            MessageContent::Text(prompt)
        } else {
            let mut parts = vec![ContentPart::Text { text: prompt }];
            parts.extend(files);
            MessageContent::Parts(parts)
        };
        messages.push(Message {
            role: ChatRole::User,
            content,
        });
        Ok(messages)
    }

    /// File inputs the model can take natively; the rest stay as URLs in the prompt text.
    fn file_parts(&self, input: &HashMap<String, Value>, capabilities: ModelCapabilities) -> Vec<ContentPart> {
        if !capabilities.multi_modal {
            return Vec::new();
        }
        let mut names: Vec<&String> = self
            .input_types
            .iter()
            .filter(|(_, info)| info.is_file())
            .map(|(name, _)| name)
            .collect();
        names.sort();

        names
            .into_iter()
            .filter_map(|name| {
                let url = input.get(name)?.as_str()?.to_string();
                let sub_type = self.input_types[name].file_type.unwrap_or(FileSubType::Default);
                match sub_type {
                    FileSubType::Image if capabilities.image_understanding => {
                        Some(ContentPart::ImageUrl { url })
                    }
                    FileSubType::Audio if capabilities.audio_understanding => {
                        Some(ContentPart::AudioUrl { url })
                    }
                    FileSubType::Video if capabilities.video_understanding => {
                        Some(ContentPart::VideoUrl { url })
                    }
                    FileSubType::Doc | FileSubType::Default => Some(ContentPart::FileUrl { url }),
                    _ => None,
                }
            })
            .collect()
    }

    /// Call the model; when streaming, also return the merged per-fragment record.
    async fn call_model(
        &self,
        model: Arc<dyn ModelClient>,
        request: ModelRequest,
        ctx: &ExecutionContext,
    ) -> NodeResult<(ModelResponse, Option<StructuredCallbackOutput>)> {
        if !(ctx.is_streaming() && self.can_stream) {
            return Ok((model.generate(request).await?, None));
        }

        let (tx, mut rx) = mpsc::channel::<StreamChunk>(64);
        let forward = async {
            let mut fragments = Vec::new();
            while let Some(chunk) = rx.recv().await {
                if chunk.delta.is_empty() {
                    continue;
                }
                fragments.push(StructuredCallbackOutput {
                    raw_output: Some(chunk.delta.clone()),
                    ..Default::default()
                });
                ctx.emit(WorkflowEvent::NodeStreamDelta {
                    execute_id: ctx.execute_id(),
                    node_key: ctx.node_key().to_string(),
                    delta: chunk.delta,
                    index: fragments.len() - 1,
                })
                .await;
            }
            fragments
        };
        let (response, fragments) = tokio::join!(model.stream(request, tx), forward);
        let response = response?;
        Ok((response, concat_callback_outputs(fragments)?))
    }

    fn shape_output(&self, response: &ModelResponse) -> NodeResult<NodeOutput> {
        let mut output = match self.config.output_format {
            OutputFormat::Text => {
                let mut output = HashMap::new();
                output.insert(
                    self.text_output_name().to_string(),
                    Value::String(response.content.clone()),
                );
                NodeOutput::new(output)
            }
            OutputFormat::Json => {
                let object = parse_json_object(&response.content)?;
                let raw: HashMap<String, Value> = object.into_iter().collect();
                let (converted, warnings) = convert_fields(&raw, &self.output_types, true);
                let warnings = warnings
                    .into_iter()
                    .filter(|w| w.path != REASONING_OUTPUT)
                    .collect();
                NodeOutput::new(converted).with_warnings(warnings)
            }
        };

        if self.output_types.contains_key(REASONING_OUTPUT) {
            output.output.insert(
                REASONING_OUTPUT.to_string(),
                Value::String(response.reasoning_content.clone().unwrap_or_default()),
            );
        }
        output.extra.insert("usage".to_string(), serde_json::to_value(&response.usage)?);
        if let Some(reason) = &response.finish_reason {
            output
                .extra
                .insert("finish_reason".to_string(), Value::String(reason.clone()));
        }
        Ok(output.with_raw_output(response.content.clone()))
    }

    async fn run(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeResult<NodeOutput> {
        let model = ctx.collaborators().models.get(&self.config.model)?;
        let messages = self.build_messages(&input, model.capabilities(), ctx)?;
        let request = ModelRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            json_output: self.config.output_format == OutputFormat::Json,
        };
        tracing::debug!(
            node_key = ctx.node_key(),
            model = %self.config.model,
            messages = request.messages.len(),
            "calling model"
        );
        let (response, streamed) = self.call_model(model, request, ctx).await?;
        let mut output = self.shape_output(&response)?;
        if let Some(raw) = streamed.and_then(|record| record.raw_output) {
            output.raw_output = Some(raw);
        }
        Ok(output)
    }
}

/// Models like to wrap JSON in markdown fences; take the object inside.
fn parse_json_object(content: &str) -> NodeResult<Map<String, Value>> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(NodeError::SerializationError(format!(
            "model output is not a JSON object: {}",
            other
        ))),
    }
}

#[async_trait]
impl NodeExecutor for LlmNode {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        self.run(input, ctx).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collaborators::Collaborators;
    use crate::core::execute_config::{ChatMessage, ExecuteConfig, SyncPattern, WorkflowMode};
    use crate::core::execution_context::test_support::context_with;
    use crate::llm::{LlmError, ModelRegistry, TokenUsage};
    use crate::schema::config::NodeConfig;
    use crate::schema::StreamConfigs;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with the text of the last message, or a fixed reply when set.
    #[derive(Default)]
    struct Echo {
        reply: Option<String>,
        seen: Mutex<Vec<ModelRequest>>,
        capabilities: ModelCapabilities,
    }

    #[async_trait]
    impl ModelClient for Echo {
        fn capabilities(&self) -> ModelCapabilities {
            self.capabilities
        }

        async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
            let content = match &self.reply {
                Some(reply) => reply.clone(),
                None => request.messages.last().map(|m| m.content.text()).unwrap_or_default(),
            };
            self.seen.lock().unwrap().push(request);
            Ok(ModelResponse {
                content,
                reasoning_content: Some("thought".into()),
                usage: TokenUsage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                },
                finish_reason: Some("stop".into()),
            })
        }
    }

    fn schema(config: &LlmConfig) -> NodeSchema {
        NodeSchema::new("llm", "LLM", NodeConfig::Llm(config.clone()))
    }

    fn config(prompt: &str) -> LlmConfig {
        LlmConfig {
            model: "echo".into(),
            user_prompt: prompt.into(),
            ..Default::default()
        }
    }

    fn ctx_with(model: Arc<Echo>, exe_cfg: ExecuteConfig, node: &NodeSchema) -> (ExecutionContext, mpsc::Receiver<WorkflowEvent>) {
        let (ctx, rx) = context_with(
            exe_cfg,
            Collaborators::builder().models(ModelRegistry::new().with("echo", model)),
        );
        (ctx.for_node(node), rx)
    }

    #[tokio::test]
    async fn test_text_output_uses_single_declared_name() {
        let config = config("echo {{ x }}");
        let node_schema = schema(&config).with_output_type("answer", TypeInfo::string());
        let node = LlmNode::new(&node_schema, config).unwrap();
        let (ctx, _rx) = ctx_with(Arc::new(Echo::default()), ExecuteConfig::default(), &node_schema);

        let outcome = node
            .invoke(HashMap::from([("x".to_string(), json!("hi"))]), &ctx)
            .await;
        let NodeOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(output.output["answer"], json!("echo hi"));
        assert_eq!(output.raw_output.as_deref(), Some("echo hi"));
        assert_eq!(output.extra["usage"]["prompt_tokens"], json!(3));
    }

    #[tokio::test]
    async fn test_json_output_is_converted_permissively() {
        let mut config = config("give json");
        config.output_format = OutputFormat::Json;
        let node_schema = schema(&config)
            .with_output_type("count", TypeInfo::new(DataType::Integer))
            .with_output_type(REASONING_OUTPUT, TypeInfo::string());
        let node = LlmNode::new(&node_schema, config).unwrap();
        let model = Arc::new(Echo {
            reply: Some("```json\n{\"count\": \"7\", \"extra\": true}\n```".into()),
            ..Default::default()
        });
        let (ctx, _rx) = ctx_with(model.clone(), ExecuteConfig::default(), &node_schema);

        let NodeOutcome::Completed(output) = node.invoke(HashMap::new(), &ctx).await else {
            panic!("expected completion");
        };
        assert_eq!(output.output["count"], json!(7));
        assert_eq!(output.output[REASONING_OUTPUT], json!("thought"));
        assert!(!output.output.contains_key("extra"));
        assert_eq!(output.warnings.len(), 1);
        assert!(node.to_callback_output(&output).error.is_some());
        assert!(model.seen.lock().unwrap()[0].json_output);
    }

    #[tokio::test]
    async fn test_json_output_not_an_object_fails() {
        let mut config = config("give json");
        config.output_format = OutputFormat::Json;
        let node_schema = schema(&config);
        let node = LlmNode::new(&node_schema, config).unwrap();
        let model = Arc::new(Echo {
            reply: Some("[1, 2]".into()),
            ..Default::default()
        });
        let (ctx, _rx) = ctx_with(model, ExecuteConfig::default(), &node_schema);
        assert!(matches!(
            node.invoke(HashMap::new(), &ctx).await,
            NodeOutcome::Failed(NodeError::SerializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_streaming_emits_deltas() {
        let config = config("echo {{ x }}");
        let node_schema = schema(&config).with_stream(StreamConfigs {
            can_generate_stream: true,
            require_streaming_input: false,
        });
        let node = LlmNode::new(&node_schema, config).unwrap();
        let exe_cfg = ExecuteConfig {
            sync_pattern: SyncPattern::Stream,
            ..Default::default()
        };
        let (ctx, mut rx) = ctx_with(Arc::new(Echo::default()), exe_cfg, &node_schema);

        let outcome = node
            .invoke(HashMap::from([("x".to_string(), json!("there"))]), &ctx)
            .await;
        assert!(matches!(outcome, NodeOutcome::Completed(_)));
        match rx.recv().await.unwrap() {
            WorkflowEvent::NodeStreamDelta { delta, index, node_key, .. } => {
                assert_eq!(delta, "echo there");
                assert_eq!(index, 0);
                assert_eq!(node_key, "llm");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    /// Streams fixed fragments; the final response text differs from them.
    struct Fragments(Vec<&'static str>);

    #[async_trait]
    impl ModelClient for Fragments {
        async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, LlmError> {
            Ok(ModelResponse {
                content: "final".into(),
                reasoning_content: None,
                usage: TokenUsage::default(),
                finish_reason: None,
            })
        }

        async fn stream(
            &self,
            request: ModelRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<ModelResponse, LlmError> {
            for delta in &self.0 {
                let _ = chunk_tx
                    .send(StreamChunk {
                        delta: delta.to_string(),
                        finish_reason: None,
                    })
                    .await;
            }
            self.generate(request).await
        }
    }

    #[tokio::test]
    async fn test_streamed_fragments_merge_into_raw_output() {
        let config = config("go");
        let node_schema = schema(&config).with_stream(StreamConfigs {
            can_generate_stream: true,
            require_streaming_input: false,
        });
        let node = LlmNode::new(&node_schema, config).unwrap();
        let exe_cfg = ExecuteConfig {
            sync_pattern: SyncPattern::Stream,
            ..Default::default()
        };
        let (ctx, mut rx) = context_with(
            exe_cfg,
            Collaborators::builder()
                .models(ModelRegistry::new().with("echo", Arc::new(Fragments(vec!["ab", "", "cd"])))),
        );
        let ctx = ctx.for_node(&node_schema);

        let NodeOutcome::Completed(output) = node.invoke(HashMap::new(), &ctx).await else {
            panic!("expected completion");
        };
        assert_eq!(output.raw_output.as_deref(), Some("abcd"));
        assert_eq!(output.output["output"], json!("final"));

        let mut indices = Vec::new();
        while let Ok(WorkflowEvent::NodeStreamDelta { index, .. }) = rx.try_recv() {
            indices.push(index);
        }
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_history_and_system_prompt_precede_user() {
        let mut config = config("now");
        config.system_prompt = Some("be brief".into());
        config.chat_history = Some(ChatHistorySetting {
            enable: true,
            rounds: 1,
        });
        let node_schema = schema(&config);
        let node = LlmNode::new(&node_schema, config).unwrap();
        let model = Arc::new(Echo::default());
        let exe_cfg = ExecuteConfig {
            workflow_mode: WorkflowMode::ChatFlow,
            conversation_history: vec![
                ChatMessage::user("old"),
                ChatMessage::assistant("old reply"),
                ChatMessage::user("recent"),
                ChatMessage::assistant("recent reply"),
            ],
            ..Default::default()
        };
        let (ctx, _rx) = ctx_with(model.clone(), exe_cfg, &node_schema);

        assert!(matches!(node.invoke(HashMap::new(), &ctx).await, NodeOutcome::Completed(_)));
        let seen = model.seen.lock().unwrap();
        let texts: Vec<String> = seen[0].messages.iter().map(|m| m.content.text()).collect();
        assert_eq!(texts, vec!["be brief", "recent", "recent reply", "now"]);
    }

    #[tokio::test]
    async fn test_image_input_becomes_part_when_supported() {
        let config = config("describe");
        let mut image = TypeInfo::new(DataType::File);
        image.file_type = Some(FileSubType::Image);
        let node_schema = schema(&config).with_input_type("pic", image);
        let node = LlmNode::new(&node_schema, config).unwrap();
        let model = Arc::new(Echo {
            capabilities: ModelCapabilities {
                multi_modal: true,
                image_understanding: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let (ctx, _rx) = ctx_with(model.clone(), ExecuteConfig::default(), &node_schema);

        let input = HashMap::from([("pic".to_string(), json!("https://cdn/x.png"))]);
        assert!(matches!(node.invoke(input, &ctx).await, NodeOutcome::Completed(_)));
        let seen = model.seen.lock().unwrap();
        match &seen[0].messages[0].content {
            MessageContent::Parts(parts) => assert_eq!(
                parts[1],
                ContentPart::ImageUrl {
                    url: "https://cdn/x.png".into()
                }
            ),
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_model_fails() {
        let mut config = config("hi");
        config.model = "missing".into();
        let node_schema = schema(&config);
        let node = LlmNode::new(&node_schema, config).unwrap();
        let (ctx, _rx) = ctx_with(Arc::new(Echo::default()), ExecuteConfig::default(), &node_schema);
        assert!(matches!(
            node.invoke(HashMap::new(), &ctx).await,
            NodeOutcome::Failed(NodeError::ModelError(_))
        ));
    }

    #[test]
    fn test_bad_template_rejected_at_build() {
        let config = config("{{ unclosed");
        let err = LlmNode::new(&schema(&config), config).err().unwrap();
        assert!(matches!(err, WorkflowError::CompileError(_)));
    }
}
