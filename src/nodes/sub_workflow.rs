//! Sub-workflow node: runs an embedded workflow inside the parent's run.
//!
//! The child shares the parent's checkpoint under the node's address, so an
//! interrupt anywhere inside it suspends and resumes the whole run.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::executor::NodeExecutor;
use crate::compiler::CompiledWorkflow;
use crate::core::dispatcher::{ScopeDispatcher, ScopeOutcome};
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{NodeOutcome, NodeOutput};
use crate::error::{NodeError, NodeResult};

const EXECUTE_ID_KEY: &str = "execute_id";

pub struct SubWorkflowNode {
    compiled: Arc<CompiledWorkflow>,
}

impl SubWorkflowNode {
    pub fn new(compiled: Arc<CompiledWorkflow>) -> Self {
        Self { compiled }
    }

    /// The child keeps its execute id across interrupts.
    async fn child_execute_id(&self, ctx: &ExecutionContext) -> NodeResult<i64> {
        if let Some(id) = ctx.intermediate(EXECUTE_ID_KEY).and_then(|v| v.as_i64()) {
            return Ok(id);
        }
        let id = ctx.gen_id().await?;
        ctx.set_intermediate(EXECUTE_ID_KEY, json!(id));
        Ok(id)
    }

    async fn run(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeResult<NodeOutcome> {
        let child_id = self.child_execute_id(ctx).await?;
        let child_ctx = ctx.sub_workflow(child_id, self.compiled.schema().clone());
        let prefix = child_ctx.prefix().to_string();
        tracing::debug!(
            execute_id = ctx.execute_id(),
            child_execute_id = child_id,
            node_key = ctx.node_key(),
            "entering sub-workflow"
        );

        let outcome = ScopeDispatcher::new(self.compiled.top_scope().clone(), child_ctx, input)
            .run()
            .await
            .map_err(NodeError::from_nested)?;

        match outcome {
            ScopeOutcome::Interrupted(events) => Ok(NodeOutcome::Interrupted(events)),
            ScopeOutcome::Completed { mut results, callbacks } => {
                let exit = self
                    .compiled
                    .exit_key()
                    .ok_or_else(|| NodeError::ExecutionError("sub-workflow has no exit node".into()))?;
                let mut output = NodeOutput::new(results.remove(exit).unwrap_or_default());
                if let Some(answer) = callbacks.get(exit).and_then(|c| c.answer.clone()) {
                    output = output.with_answer(answer);
                }
                output.extra.insert("execute_id".to_string(), json!(child_id));

                ctx.checkpoint().clear_scope(&prefix);
                ctx.checkpoint().clear_intermediate(&ctx.address());
                Ok(NodeOutcome::Completed(output))
            }
        }
    }
}

#[async_trait]
impl NodeExecutor for SubWorkflowNode {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        match self.run(input, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => NodeOutcome::Failed(e),
        }
    }
}
