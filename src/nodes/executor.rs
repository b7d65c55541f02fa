use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::callback::{CallbackError, StructuredCallbackInput, StructuredCallbackOutput};
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{NodeOutcome, NodeOutput};
use crate::schema::convert::describe_warnings;

/// Trait for node execution. Each node kind implements this.
///
/// Instances are built once per compiled workflow and shared by every run,
/// so all per-run state lives in the [`ExecutionContext`].
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run the node with its resolved inputs.
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome;

    /// Record reported to observers once the node completed.
    fn to_callback_output(&self, output: &NodeOutput) -> StructuredCallbackOutput {
        StructuredCallbackOutput {
            output: output.output.clone(),
            raw_output: output.raw_output.clone(),
            extra: output.extra.clone(),
            answer: output.answer.clone(),
            error: output.error.clone().or_else(|| warning_error(output)),
            warnings: output.warnings.clone(),
            input: output.input.clone(),
            ..Default::default()
        }
    }

    fn to_callback_input(&self, input: &HashMap<String, Value>) -> StructuredCallbackInput {
        StructuredCallbackInput {
            input: input.clone(),
            extra: HashMap::new(),
        }
    }
}

/// Permissive-parse warnings surface as a warning-level callback error.
pub fn warning_error(output: &NodeOutput) -> Option<CallbackError> {
    if output.warnings.is_empty() {
        None
    } else {
        Some(CallbackError::warning(describe_warnings(&output.warnings)))
    }
}

/// Read a required string input.
pub fn required_str<'a>(
    input: &'a HashMap<String, Value>,
    name: &str,
) -> crate::error::NodeResult<&'a str> {
    match input.get(name) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(Value::Null) | None => Err(crate::error::NodeError::MissingInput(name.to_string())),
        Some(other) => Err(crate::error::NodeError::InputValidationError(format!(
            "{} must be a string, got {}",
            name, other
        ))),
    }
}
