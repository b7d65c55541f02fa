//! Schedules the nodes of one scope.
//!
//! A scope is either the top level of a workflow or the children of one
//! composite node. Nodes launch on a [`JoinSet`] as soon as their control
//! edges and data references are resolved; branch routing skips untaken
//! edges and skips cascade. Interrupts stop new launches, let running nodes
//! finish, and are recorded in the shared checkpoint.

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::callback::{CallbackError, StructuredCallbackOutput};
use super::event_bus::WorkflowEvent;
use super::execution_context::{ExecutionContext, VisibleOutputs};
use super::interrupt::{InterruptEvent, NodeOutcome, NodeOutput};
use crate::compiler::{Scope, ScopeNode};
use crate::error::{NodeError, WorkflowError, WorkflowResult};
use crate::nodes::NodeExecutor;
use crate::schema::{Connection, FieldSource, NodeKey, NodeSchema, NodeType};

/// How a scope run ended, short of an error.
#[derive(Debug)]
pub enum ScopeOutcome {
    Completed {
        results: VisibleOutputs,
        callbacks: HashMap<NodeKey, StructuredCallbackOutput>,
    },
    /// Every event raised in the scope, including nested ones.
    Interrupted(Vec<InterruptEvent>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Completed,
    Skipped,
}

enum Control {
    Wait,
    Run,
    Skip,
}

struct NodeRun {
    key: NodeKey,
    outcome: NodeOutcome,
    /// Failure swallowed by the node's exception config.
    swallowed: Option<NodeError>,
}

pub struct ScopeDispatcher {
    scope: Arc<Scope>,
    ctx: ExecutionContext,
    entry_inputs: HashMap<String, Value>,
    states: HashMap<NodeKey, NodeState>,
    results: VisibleOutputs,
    callbacks: HashMap<NodeKey, StructuredCallbackOutput>,
}

impl ScopeDispatcher {
    /// `ctx` is the scope-level context; `entry_inputs` feed the scope's entry node.
    pub fn new(scope: Arc<Scope>, ctx: ExecutionContext, entry_inputs: HashMap<String, Value>) -> Self {
        Self {
            scope,
            ctx,
            entry_inputs,
            states: HashMap::new(),
            results: VisibleOutputs::new(),
            callbacks: HashMap::new(),
        }
    }

    pub async fn run(mut self) -> WorkflowResult<ScopeOutcome> {
        self.restore();

        let scope = self.scope.clone();
        let cancel = self.ctx.cancel_token().clone();
        let max_concurrency = self.ctx.engine_config().max_concurrency;
        let mut join_set: JoinSet<NodeRun> = JoinSet::new();
        let mut interrupts: Vec<InterruptEvent> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                drain(&mut join_set).await;
                return Err(WorkflowError::Canceled);
            }

            if interrupts.is_empty() {
                self.propagate_skips().await;

                for node in &scope.nodes {
                    if max_concurrency != 0 && join_set.len() >= max_concurrency {
                        break;
                    }
                    if !self.is_ready(node) {
                        continue;
                    }
                    self.launch(node, &mut join_set).await;
                }
            }

            if join_set.is_empty() {
                break;
            }

            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    drain(&mut join_set).await;
                    return Err(WorkflowError::Canceled);
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else {
                continue;
            };

            let run = match joined {
                Ok(run) => run,
                Err(join_error) => {
                    if join_error.is_cancelled() {
                        continue;
                    }
                    drain(&mut join_set).await;
                    return Err(WorkflowError::InternalError(format!(
                        "node task join error: {}",
                        join_error
                    )));
                }
            };

            let Some(node) = scope.node(&run.key) else {
                continue;
            };

            match run.outcome {
                NodeOutcome::Completed(output) => {
                    self.complete(node, output, run.swallowed).await;
                }
                NodeOutcome::Interrupted(events) => {
                    let address = self.ctx.address_of(&run.key);
                    for event in events {
                        if self.ctx.checkpoint().add_pending(&address, event.clone()) {
                            tracing::info!(
                                execute_id = self.ctx.execute_id(),
                                node_key = %run.key,
                                event_id = event.id,
                                "interrupt captured"
                            );
                        }
                        interrupts.push(event);
                    }
                    self.states.insert(run.key, NodeState::Pending);
                }
                NodeOutcome::Failed(error) => {
                    drain(&mut join_set).await;
                    return Err(self.fail(&node.schema, error).await);
                }
            }
        }

        if !interrupts.is_empty() {
            return Ok(ScopeOutcome::Interrupted(interrupts));
        }

        Ok(ScopeOutcome::Completed {
            results: self.results,
            callbacks: self.callbacks,
        })
    }

    /// Pick up nodes a previous attempt of this run already finished.
    fn restore(&mut self) {
        let checkpoint = self.ctx.checkpoint().clone();
        for node in &self.scope.nodes {
            let key = node.schema.key.clone();
            let address = self.ctx.address_of(&key);
            let state = if let Some(output) = checkpoint.completed(&address) {
                self.results.insert(key.clone(), output);
                NodeState::Completed
            } else if checkpoint.is_skipped(&address) {
                NodeState::Skipped
            } else {
                NodeState::Pending
            };
            self.states.insert(key, state);
        }
    }

    fn state(&self, key: &str) -> NodeState {
        self.states.get(key).copied().unwrap_or(NodeState::Pending)
    }

    fn edge_taken(&self, conn: &Connection) -> bool {
        let Some(branch) = self.scope.branches.get(&conn.from_node) else {
            return true;
        };
        let Some(port) = conn.from_port.as_deref() else {
            return true;
        };
        self.results
            .get(&conn.from_node)
            .map(|output| branch.resolve_port(output) == port)
            .unwrap_or(false)
    }

    fn control(&self, key: &str) -> Control {
        let mut has_incoming = false;
        let mut taken = false;
        for conn in self.scope.incoming(key) {
            has_incoming = true;
            match self.state(&conn.from_node) {
                NodeState::Completed => taken |= self.edge_taken(conn),
                NodeState::Skipped => {}
                NodeState::Pending | NodeState::Running => return Control::Wait,
            }
        }
        if !has_incoming || taken {
            Control::Run
        } else {
            Control::Skip
        }
    }

    fn is_ready(&self, node: &ScopeNode) -> bool {
        let key = node.schema.key.as_str();
        if self.state(key) != NodeState::Pending || !matches!(self.control(key), Control::Run) {
            return false;
        }
        node.schema.referenced_nodes().into_iter().all(|dep| {
            dep == key
                || !self.scope.contains(dep)
                || matches!(self.state(dep), NodeState::Completed | NodeState::Skipped)
        })
    }

    /// Skip every node whose incoming edges were all left untaken, until nothing changes.
    async fn propagate_skips(&mut self) {
        loop {
            let skipped: Vec<NodeKey> = self
                .scope
                .nodes
                .iter()
                .map(|n| n.schema.key.as_str())
                .filter(|k| self.state(k) == NodeState::Pending)
                .filter(|k| matches!(self.control(k), Control::Skip))
                .map(str::to_string)
                .collect();
            if skipped.is_empty() {
                return;
            }
            for key in skipped {
                tracing::debug!(execute_id = self.ctx.execute_id(), node_key = %key, "node skipped");
                self.ctx.checkpoint().record_skipped(&self.ctx.address_of(&key));
                self.states.insert(key.clone(), NodeState::Skipped);
                self.ctx
                    .emit(WorkflowEvent::NodeSkipped {
                        execute_id: self.ctx.execute_id(),
                        node_key: key,
                        timestamp: Utc::now(),
                    })
                    .await;
            }
        }
    }

    fn resolve_input(&self, node: &NodeSchema) -> HashMap<String, Value> {
        if node.node_type == NodeType::Entry {
            return self.entry_inputs.clone();
        }
        let mut input = HashMap::new();
        for mapping in &node.input_sources {
            let value = match &mapping.source {
                FieldSource::Literal(value) => Some(value.clone()),
                FieldSource::Ref(r) => self
                    .results
                    .get(&r.from_node_key)
                    .or_else(|| self.ctx.visible().get(&r.from_node_key))
                    .and_then(|output| r.lookup(output))
                    .cloned(),
            };
            if let Some(value) = value {
                input.insert(mapping.name.clone(), value);
            }
        }
        input
    }

    async fn launch(&mut self, node: &ScopeNode, join_set: &mut JoinSet<NodeRun>) {
        let schema = node.schema.clone();
        let input = self.resolve_input(&schema);
        let mut node_ctx = self.ctx.for_node(&schema);
        if schema.node_type.is_composite() {
            let mut visible = self.ctx.visible().as_ref().clone();
            visible.extend(self.results.iter().map(|(k, v)| (k.clone(), v.clone())));
            node_ctx = node_ctx.with_visible(Arc::new(visible));
        }

        self.states.insert(schema.key.clone(), NodeState::Running);
        tracing::debug!(
            execute_id = self.ctx.execute_id(),
            node_key = %schema.key,
            node_type = %schema.node_type,
            "node started"
        );
        self.ctx
            .emit(WorkflowEvent::NodeStarted {
                execute_id: self.ctx.execute_id(),
                node_key: schema.key.clone(),
                node_type: schema.node_type,
                node_name: schema.name.clone(),
                input: Box::new(node.executor.to_callback_input(&input)),
                timestamp: Utc::now(),
            })
            .await;

        let executor = node.executor.clone();
        join_set.spawn(async move {
            let (outcome, swallowed) = invoke_with_policy(executor.as_ref(), &schema, input, &node_ctx).await;
            NodeRun {
                key: schema.key.clone(),
                outcome,
                swallowed,
            }
        });
    }

    async fn complete(&mut self, node: &ScopeNode, output: NodeOutput, swallowed: Option<NodeError>) {
        let key = node.schema.key.clone();
        let mut callback = node.executor.to_callback_output(&output);
        if let Some(error) = swallowed {
            callback.error = Some(CallbackError::error(error.to_string()));
        }

        self.ctx
            .checkpoint()
            .record_completed(&self.ctx.address_of(&key), output.output.clone());
        self.results.insert(key.clone(), output.output);
        self.states.insert(key.clone(), NodeState::Completed);

        self.ctx
            .emit(WorkflowEvent::NodeFinished {
                execute_id: self.ctx.execute_id(),
                node_key: key.clone(),
                node_type: node.schema.node_type,
                output: Box::new(callback.clone()),
                timestamp: Utc::now(),
            })
            .await;
        self.callbacks.insert(key, callback);
    }

    async fn fail(&self, node: &NodeSchema, error: NodeError) -> WorkflowError {
        if matches!(error, NodeError::Canceled) {
            return WorkflowError::Canceled;
        }
        tracing::warn!(
            execute_id = self.ctx.execute_id(),
            node_key = %node.key,
            node_type = %node.node_type,
            error = %error,
            "node failed"
        );
        self.ctx
            .emit(WorkflowEvent::NodeFailed {
                execute_id: self.ctx.execute_id(),
                node_key: node.key.clone(),
                node_type: node.node_type,
                error: error.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        WorkflowError::NodeExecution {
            node_key: node.key.clone(),
            node_type: node.node_type,
            source: error,
        }
    }
}

async fn drain(join_set: &mut JoinSet<NodeRun>) {
    join_set.abort_all();
    while join_set.join_next().await.is_some() {}
}

/// Invoke with panic recovery, opt-in retries and the default-output fallback.
async fn invoke_with_policy(
    executor: &dyn NodeExecutor,
    schema: &NodeSchema,
    input: HashMap<String, Value>,
    ctx: &ExecutionContext,
) -> (NodeOutcome, Option<NodeError>) {
    let max_retry = schema
        .exception_configs
        .as_ref()
        .map(|c| c.max_retry)
        .unwrap_or(0);
    let mut attempt = 0;

    loop {
        let outcome = match AssertUnwindSafe(executor.invoke(input.clone(), ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => NodeOutcome::Failed(NodeError::Panicked(panic_message(panic.as_ref()))),
        };

        let error = match outcome {
            NodeOutcome::Failed(error)
                if !error.is_infrastructure() && !matches!(error, NodeError::Panicked(_)) =>
            {
                error
            }
            other => return (other, None),
        };

        if attempt < max_retry {
            attempt += 1;
            tracing::warn!(
                node_key = %schema.key,
                attempt,
                error = %error,
                "retrying node"
            );
            continue;
        }

        return match schema.default_error_output() {
            Some(output) => (NodeOutcome::Completed(NodeOutput::new(output)), Some(error)),
            None => (NodeOutcome::Failed(error), None),
        };
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
