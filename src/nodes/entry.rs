//! Entry and exit nodes: where run inputs come in and outputs leave.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::executor::NodeExecutor;
use crate::core::event_bus::WorkflowEvent;
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{NodeOutcome, NodeOutput};
use crate::error::{NodeError, WorkflowError, WorkflowResult};
use crate::schema::config::{EntryConfig, ExitConfig, TerminatePlan};
use crate::schema::{NodeSchema, TypeInfo};
use crate::template::TemplateEngine;

/// Output key an answer-content exit writes its rendered answer to.
pub const ANSWER_OUTPUT: &str = "output";

pub struct EntryNode {
    config: EntryConfig,
    declared: HashMap<String, TypeInfo>,
}

impl EntryNode {
    pub fn new(node: &NodeSchema, config: EntryConfig) -> Self {
        Self {
            config,
            declared: node.output_types.clone(),
        }
    }
}

#[async_trait]
impl NodeExecutor for EntryNode {
    async fn invoke(&self, mut input: HashMap<String, Value>, _ctx: &ExecutionContext) -> NodeOutcome {
        for (name, value) in &self.config.default_values {
            match input.get(name) {
                Some(v) if !v.is_null() => {}
                _ => {
                    input.insert(name.clone(), value.clone());
                }
            }
        }
        for (name, info) in &self.declared {
            if info.required && input.get(name).map(Value::is_null).unwrap_or(true) {
                return NodeOutcome::Failed(NodeError::MissingInput(name.clone()));
            }
        }
        NodeOutcome::Completed(NodeOutput::new(input))
    }
}

pub struct ExitNode {
    config: ExitConfig,
}

impl ExitNode {
    pub fn new(node: &NodeSchema, config: ExitConfig) -> WorkflowResult<Self> {
        if config.terminate_plan == TerminatePlan::UseAnswerContent {
            let template = config.answer_template.as_deref().ok_or_else(|| {
                WorkflowError::CompileError(format!("exit '{}' has no answer template", node.key))
            })?;
            TemplateEngine::shared()
                .check(template)
                .map_err(|e| WorkflowError::CompileError(format!("exit '{}': {}", node.key, e)))?;
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl NodeExecutor for ExitNode {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        match self.config.terminate_plan {
            TerminatePlan::ReturnVariables => NodeOutcome::Completed(NodeOutput::new(input)),
            TerminatePlan::UseAnswerContent => {
                let template = self.config.answer_template.as_deref().unwrap_or_default();
                let answer = match TemplateEngine::shared().render(template, &input) {
                    Ok(answer) => answer,
                    Err(e) => return NodeOutcome::Failed(e),
                };
                if ctx.is_streaming() {
                    ctx.emit(WorkflowEvent::NodeStreamDelta {
                        execute_id: ctx.execute_id(),
                        node_key: ctx.node_key().to_string(),
                        delta: answer.clone(),
                        index: 0,
                    })
                    .await;
                }
                let output = HashMap::from([(ANSWER_OUTPUT.to_string(), Value::String(answer.clone()))]);
                NodeOutcome::Completed(NodeOutput::new(output).with_answer(answer))
            }
        }
    }
}
