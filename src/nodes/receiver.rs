//! Input receiver: stops the run until the user fills in a form.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

use super::executor::{warning_error, NodeExecutor};
use crate::core::callback::StructuredCallbackOutput;
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{InterruptEventType, NodeOutcome, NodeOutput};
use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
use crate::schema::config::ReceiverConfig;
use crate::schema::{convert_fields, NodeSchema, TypeInfo};

pub struct InputReceiverNode {
    output_types: HashMap<String, TypeInfo>,
    /// Serialized interrupt payload, fixed at build time.
    interrupt_data: String,
}

impl InputReceiverNode {
    pub fn new(node: &NodeSchema, config: &ReceiverConfig) -> WorkflowResult<Self> {
        let schema = match &config.output_schema {
            Some(schema) => schema.clone(),
            None => {
                let sorted: BTreeMap<&String, &TypeInfo> = node.output_types.iter().collect();
                serde_json::to_string(&sorted).map_err(|e| {
                    WorkflowError::CompileError(format!("receiver '{}': {}", node.key, e))
                })?
            }
        };
        let interrupt_data = json!({"content_type": "form_schema", "content": schema}).to_string();
        Ok(Self {
            output_types: node.output_types.clone(),
            interrupt_data,
        })
    }

    fn parse_resume(&self, data: &str, line_mode: bool) -> NodeResult<NodeOutput> {
        let raw = if line_mode {
            parse_lines(data)
        } else {
            match serde_json::from_str::<Value>(data)? {
                Value::Object(map) => map.into_iter().collect(),
                other => {
                    return Err(NodeError::InputValidationError(format!(
                        "resume data must be a JSON object, got {}",
                        other
                    )))
                }
            }
        };
        let (output, warnings) = convert_fields(&raw, &self.output_types, true);
        if !warnings.is_empty() {
            tracing::warn!(count = warnings.len(), "resume data did not match the form");
        }
        Ok(NodeOutput::new(output)
            .with_raw_output(data)
            .with_warnings(warnings))
    }

    async fn run(&self, ctx: &ExecutionContext) -> NodeResult<NodeOutcome> {
        if let Some(data) = ctx.take_resume_data() {
            let output = self.parse_resume(&data, ctx.exe_cfg().uses_line_resume())?;
            return Ok(NodeOutcome::Completed(output));
        }
        if let Some(event) = ctx.replay_interrupt() {
            return Ok(NodeOutcome::interrupted(event));
        }
        let event = ctx
            .raise_interrupt(InterruptEventType::Input, self.interrupt_data.clone())
            .await?;
        Ok(NodeOutcome::interrupted(event))
    }
}

/// `key:value` per line, split at the first colon; blank lines are ignored.
fn parse_lines(data: &str) -> HashMap<String, Value> {
    data.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), Value::String(value.trim().to_string())))
        })
        .collect()
}

#[async_trait]
impl NodeExecutor for InputReceiverNode {
    async fn invoke(&self, _input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        match self.run(ctx).await {
            Ok(outcome) => outcome,
            Err(e) => NodeOutcome::Failed(e),
        }
    }

    fn to_callback_output(&self, output: &NodeOutput) -> StructuredCallbackOutput {
        StructuredCallbackOutput {
            output: output.output.clone(),
            raw_output: output.raw_output.clone(),
            input: Some(output.output.clone()),
            error: warning_error(output),
            warnings: output.warnings.clone(),
            ..Default::default()
        }
    }
}
