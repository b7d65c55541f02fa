//! # nodeflow
//!
//! A graph workflow orchestrator. Workflows are graphs of typed nodes (entry,
//! exit, LLM, selector, knowledge, plugin, input receiver, sub-workflow, batch
//! and loop) joined by control edges and data references.
//!
//! - **Compilation**: a raw [`Canvas`] is adapted into a [`WorkflowSchema`],
//!   validated, and compiled into one scheduling scope per nesting level.
//! - **Streaming**: a run streams when its graph needs it or the caller asks for
//!   it; streaming nodes forward text deltas as events.
//! - **Interrupt and resume**: nodes may suspend the run to wait for a user or an
//!   OAuth grant. The run state is saved as a [`Checkpoint`] and resumed under
//!   the same execute id, at any nesting depth.
//! - **Structured output**: per-item outputs of batch and loop nodes merge into
//!   arrays in fan-out order.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use nodeflow::{load_workflow, DslFormat, EngineConfig, WorkflowCompiler};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let yaml = std::fs::read_to_string("workflow.yaml")?;
//!     let schema = load_workflow(&yaml, DslFormat::Yaml)?;
//!     let compiled = WorkflowCompiler::compile(schema, EngineConfig::default())?;
//!     let handle = compiled.runner().input("query", json!("hello")).run().await?;
//!     println!("{:?}", handle.wait().await);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod compiler;
pub mod core;
pub mod dsl;
pub mod error;
pub mod graph;
pub mod llm;
pub mod nodes;
pub mod schema;
pub mod service;
pub mod template;

pub use crate::api::{WorkflowHandle, WorkflowRunnerBuilder};
pub use crate::compiler::{CompiledWorkflow, CompiledWorkflowCache, WorkflowCompiler};
pub use crate::core::{
    Checkpoint, CheckpointError, CheckpointStore, Collaborators, EngineConfig, ExecuteConfig,
    ExecutionStatus, FakeIdGenerator, FileCheckpointStore, IdGenerator, InterruptEvent,
    InterruptEventType, MemoryCheckpointStore, SnowflakeIdGenerator, StructuredCallbackOutput,
    WorkflowEvent,
};
pub use crate::dsl::{
    adapt_canvas, load_workflow, parse_canvas, validate_schema, Canvas, Diagnostic,
    DiagnosticLevel, DslFormat, ValidationReport,
};
pub use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
pub use crate::llm::{ModelClient, ModelRegistry};
pub use crate::nodes::NodeExecutor;
pub use crate::schema::{NodeSchema, NodeType, WorkflowSchema};
pub use crate::service::{KnowledgeService, PluginService};
