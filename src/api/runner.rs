//! Starting and resuming runs of a compiled workflow.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::handle::WorkflowHandle;
use crate::compiler::CompiledWorkflow;
use crate::core::checkpoint::{Checkpoint, CheckpointState, CheckpointStore, ResumeClaim};
use crate::core::collaborators::Collaborators;
use crate::core::dispatcher::{ScopeDispatcher, ScopeOutcome};
use crate::core::event_bus::{EventEmitter, WorkflowEvent};
use crate::core::execute_config::ExecuteConfig;
use crate::core::execution_context::ExecutionContext;
use crate::core::status::ExecutionStatus;
use crate::error::{WorkflowError, WorkflowResult};

/// Configures one run of a compiled workflow. Obtained from
/// [`CompiledWorkflow::runner`].
///
/// A run with the execute id of an interrupted run continues from its
/// checkpoint. Without [`resume`](Self::resume) data the pending interrupts are
/// raised again with their original ids.
pub struct WorkflowRunnerBuilder {
    compiled: Arc<CompiledWorkflow>,
    inputs: HashMap<String, Value>,
    exe_cfg: ExecuteConfig,
    collaborators: Option<Collaborators>,
    resume: Option<(String, String)>,
}

impl WorkflowRunnerBuilder {
    pub fn new(compiled: Arc<CompiledWorkflow>) -> Self {
        Self {
            compiled,
            inputs: HashMap::new(),
            exe_cfg: ExecuteConfig::default(),
            collaborators: None,
            resume: None,
        }
    }

    pub fn inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn execute_config(mut self, exe_cfg: ExecuteConfig) -> Self {
        self.exe_cfg = exe_cfg;
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Answer the pending interrupt `target` names (address, node key or event id).
    pub fn resume(mut self, target: impl Into<String>, data: impl Into<String>) -> Self {
        self.resume = Some((target.into(), data.into()));
        self
    }

    /// Start the run in the background.
    ///
    /// Fails before anything runs when the resume target cannot be accepted.
    pub async fn run(self) -> WorkflowResult<WorkflowHandle> {
        let Self {
            compiled,
            inputs,
            mut exe_cfg,
            collaborators,
            resume,
        } = self;
        let collaborators = Arc::new(collaborators.unwrap_or_default());
        let store = collaborators.checkpoint_store.clone();

        let execute_id = if exe_cfg.id != 0 {
            exe_cfg.id
        } else {
            collaborators.id_generator.gen_id().await?
        };
        exe_cfg.id = execute_id;

        let (checkpoint, resumed) = match resume {
            Some((target, data)) => match store.claim_resume(execute_id, &target, data).await? {
                ResumeClaim::Accepted(checkpoint) => {
                    tracing::info!(execute_id, target = %target, "resume accepted");
                    (checkpoint, true)
                }
                ResumeClaim::NotPending => {
                    return Err(WorkflowError::NoPendingInterrupt {
                        execute_id,
                        node_key: target,
                    })
                }
                ResumeClaim::Missing => {
                    return Err(WorkflowError::ResumeRejected {
                        execute_id,
                        reason: "no checkpoint for this execution".into(),
                    })
                }
            },
            None => match store.load(execute_id).await? {
                Some(checkpoint) => (checkpoint, true),
                None => (Checkpoint::new(execute_id, inputs), false),
            },
        };
        let inputs = checkpoint.inputs.clone();

        for file in compiled.schema().input_file_fields() {
            exe_cfg
                .input_file_fields
                .entry(file.file_url.clone())
                .or_insert(file);
        }
        let cancellable = exe_cfg.cancellable;

        let engine_config = compiled.engine_config().clone();
        let (emitter, events, listening) = EventEmitter::channel(engine_config.event_buffer);
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Running);
        let cancel = CancellationToken::new();
        let state = Arc::new(CheckpointState::new(checkpoint));
        let ctx = ExecutionContext::new(
            execute_id,
            Arc::new(exe_cfg),
            compiled.schema().clone(),
            state.clone(),
            collaborators,
            emitter,
            engine_config,
            cancel.clone(),
        );

        tokio::spawn(async move {
            tracing::info!(execute_id, resumed, "workflow started");
            ctx.emit(WorkflowEvent::WorkflowStarted {
                execute_id,
                resumed,
                timestamp: Utc::now(),
            })
            .await;

            let outcome = ScopeDispatcher::new(compiled.top_scope().clone(), ctx.clone(), inputs)
                .run()
                .await;
            let (status, event) = finish(&compiled, &state, store.as_ref(), execute_id, outcome).await;
            ctx.emit(event).await;
            let _ = status_tx.send(status);
        });

        Ok(WorkflowHandle::new(
            execute_id,
            events,
            listening,
            status_rx,
            cancel,
            cancellable,
        ))
    }
}

/// Persist or discard the checkpoint and pick the terminal status.
async fn finish(
    compiled: &CompiledWorkflow,
    state: &CheckpointState,
    store: &dyn CheckpointStore,
    execute_id: i64,
    outcome: WorkflowResult<ScopeOutcome>,
) -> (ExecutionStatus, WorkflowEvent) {
    let timestamp = Utc::now();
    match outcome {
        Ok(ScopeOutcome::Interrupted(events)) => {
            if let Err(e) = store.save(execute_id, &state.snapshot()).await {
                tracing::error!(execute_id, error = %e, "failed to save checkpoint");
                let error = WorkflowError::from(e).to_string();
                return (
                    ExecutionStatus::Failed(error.clone()),
                    WorkflowEvent::WorkflowFailed {
                        execute_id,
                        error,
                        timestamp,
                    },
                );
            }
            tracing::info!(execute_id, pending = events.len(), "workflow interrupted, checkpoint saved");
            (
                ExecutionStatus::Interrupted(events.clone()),
                WorkflowEvent::WorkflowInterrupted {
                    execute_id,
                    events,
                    timestamp,
                },
            )
        }
        Ok(ScopeOutcome::Completed { mut results, callbacks }) => {
            discard(store, execute_id).await;
            let exit = compiled.exit_key();
            let output = exit.and_then(|k| results.remove(k)).unwrap_or_default();
            let answer = exit
                .and_then(|k| callbacks.get(k))
                .and_then(|c| c.answer.clone());
            tracing::info!(execute_id, "workflow succeeded");
            (
                ExecutionStatus::Success(output.clone()),
                WorkflowEvent::WorkflowSucceeded {
                    execute_id,
                    output,
                    answer,
                    timestamp,
                },
            )
        }
        Err(WorkflowError::Canceled) => {
            discard(store, execute_id).await;
            tracing::info!(execute_id, "workflow canceled");
            (
                ExecutionStatus::Canceled,
                WorkflowEvent::WorkflowCanceled {
                    execute_id,
                    timestamp,
                },
            )
        }
        Err(e) => {
            discard(store, execute_id).await;
            tracing::error!(execute_id, node_key = ?e.node_key(), error = %e, "workflow failed");
            let error = e.to_string();
            (
                ExecutionStatus::Failed(error.clone()),
                WorkflowEvent::WorkflowFailed {
                    execute_id,
                    error,
                    timestamp,
                },
            )
        }
    }
}

async fn discard(store: &dyn CheckpointStore, execute_id: i64) {
    match store.delete(execute_id).await {
        Ok(()) => tracing::debug!(execute_id, "checkpoint discarded"),
        Err(e) => tracing::warn!(execute_id, error = %e, "failed to discard checkpoint"),
    }
}
