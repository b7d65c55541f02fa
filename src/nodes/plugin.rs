//! Plugin tool node.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::executor::NodeExecutor;
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{InterruptEventType, NodeOutcome, NodeOutput};
use crate::error::NodeResult;
use crate::schema::config::PluginConfig;
use crate::schema::{NodeKey, NodeSchema};
use crate::service::plugin::{ExecuteToolRequest, ToolInterruptKind, ToolOptions, ToolResponse};

pub struct PluginNode {
    key: NodeKey,
    config: PluginConfig,
}

impl PluginNode {
    pub fn new(node: &NodeSchema, config: PluginConfig) -> Self {
        Self {
            key: node.key.clone(),
            config,
        }
    }

    async fn run(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeResult<NodeOutcome> {
        // Resume data only signals that authorization happened; the tool runs again.
        let resumed = ctx.take_resume_data().is_some();
        if !resumed {
            if let Some(event) = ctx.replay_interrupt() {
                return Ok(NodeOutcome::interrupted(event));
            }
        }

        let plugins = ctx.collaborators().plugins()?;
        let request = ExecuteToolRequest {
            plugin_id: self.config.plugin_id,
            tool_id: self.config.tool_id,
            plugin_version: self.config.plugin_version.clone(),
            arguments_json: serde_json::to_string(&input)?,
            options: ToolOptions {
                execute_id: ctx.root_execute_id(),
                operator: ctx.exe_cfg().operator,
                resumed,
            },
        };
        tracing::debug!(
            node_key = %self.key,
            plugin_id = self.config.plugin_id,
            tool_id = self.config.tool_id,
            resumed,
            "executing tool"
        );

        match plugins.execute_tool(request).await? {
            ToolResponse::Completed { result_json } => {
                let output = parse_tool_result(&result_json)?;
                Ok(NodeOutcome::Completed(
                    NodeOutput::new(output).with_raw_output(result_json),
                ))
            }
            ToolResponse::Interrupted(interrupt) => {
                let event_type = match interrupt.kind {
                    ToolInterruptKind::NeedOAuth => InterruptEventType::OauthPlugin,
                };
                let event = ctx.raise_interrupt(event_type, interrupt.data).await?;
                Ok(NodeOutcome::interrupted(event))
            }
        }
    }
}

/// Object results map onto outputs; anything else lands under `output`.
fn parse_tool_result(result_json: &str) -> NodeResult<HashMap<String, Value>> {
    if result_json.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(match serde_json::from_str::<Value>(result_json)? {
        Value::Object(map) => map.into_iter().collect(),
        other => HashMap::from([("output".to_string(), other)]),
    })
}

#[async_trait]
impl NodeExecutor for PluginNode {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        match self.run(input, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => NodeOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collaborators::Collaborators;
    use crate::core::execute_config::ExecuteConfig;
    use crate::core::execution_context::test_support::context_with;
    use crate::error::NodeError;
    use crate::schema::config::NodeConfig;
    use crate::service::plugin::{PluginService, ToolInterrupt};
    use crate::service::ServiceError;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Asks for authorization until called with `resumed`.
    #[derive(Default)]
    struct OAuthTool {
        calls: Mutex<Vec<ExecuteToolRequest>>,
    }

    #[async_trait]
    impl PluginService for OAuthTool {
        async fn execute_tool(&self, request: ExecuteToolRequest) -> Result<ToolResponse, ServiceError> {
            let resumed = request.options.resumed;
            let args: Value = serde_json::from_str(&request.arguments_json)
                .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
            self.calls.lock().unwrap().push(request);
            if resumed {
                Ok(ToolResponse::Completed {
                    result_json: json!({"echo": args["q"]}).to_string(),
                })
            } else {
                Ok(ToolResponse::Interrupted(ToolInterrupt {
                    kind: ToolInterruptKind::NeedOAuth,
                    data: "https://auth".into(),
                }))
            }
        }
    }

    fn setup(tool: Arc<OAuthTool>) -> (PluginNode, ExecutionContext) {
        let config = PluginConfig {
            plugin_id: 1,
            tool_id: 2,
            plugin_version: None,
        };
        let schema = NodeSchema::new("tool", "Tool", NodeConfig::Plugin(config.clone()));
        let (ctx, _rx) = context_with(
            ExecuteConfig::default(),
            Collaborators::builder().plugins(tool),
        );
        (PluginNode::new(&schema, config), ctx.for_node(&schema))
    }

    #[tokio::test]
    async fn test_oauth_interrupt_then_resume() {
        let tool = Arc::new(OAuthTool::default());
        let (node, ctx) = setup(tool.clone());
        let input = HashMap::from([("q".to_string(), json!("weather"))]);

        let NodeOutcome::Interrupted(events) = node.invoke(input.clone(), &ctx).await else {
            panic!("expected interrupt");
        };
        assert_eq!(events[0].event_type, InterruptEventType::OauthPlugin);
        assert_eq!(events[0].interrupt_data, "https://auth");

        // Re-entered without resume data: same event, tool not called again.
        let NodeOutcome::Interrupted(again) = node.invoke(input.clone(), &ctx).await else {
            panic!("expected replayed interrupt");
        };
        assert_eq!(again[0].id, events[0].id);
        assert_eq!(tool.calls.lock().unwrap().len(), 1);

        ctx.checkpoint().add_pending(&ctx.address(), events[0].clone());
        ctx.checkpoint().accept_resume("tool", String::new()).unwrap();
        let NodeOutcome::Completed(output) = node.invoke(input, &ctx).await else {
            panic!("expected completion");
        };
        assert_eq!(output.output["echo"], json!("weather"));
        assert!(tool.calls.lock().unwrap()[1].options.resumed);
    }

    #[tokio::test]
    async fn test_missing_plugin_service() {
        let config = PluginConfig {
            plugin_id: 1,
            tool_id: 2,
            plugin_version: None,
        };
        let schema = NodeSchema::new("tool", "Tool", NodeConfig::Plugin(config.clone()));
        let (ctx, _rx) = crate::core::execution_context::test_support::context(ExecuteConfig::default());
        let node = PluginNode::new(&schema, config);
        assert!(matches!(
            node.invoke(HashMap::new(), &ctx.for_node(&schema)).await,
            NodeOutcome::Failed(NodeError::CollaboratorMissing("plugins"))
        ));
    }

    #[test]
    fn test_parse_tool_result() {
        assert_eq!(parse_tool_result("").unwrap(), HashMap::new());
        assert_eq!(parse_tool_result("[1]").unwrap()["output"], json!([1]));
        assert_eq!(parse_tool_result(r#"{"a": 1}"#).unwrap()["a"], json!(1));
        assert!(parse_tool_result("{").is_err());
    }
}
