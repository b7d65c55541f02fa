//! Node executors, one module per node family.

pub mod batch;
pub mod entry;
pub mod executor;
pub mod knowledge;
pub mod llm;
pub mod plugin;
pub mod receiver;
pub mod selector;
pub mod sub_workflow;

pub use executor::{required_str, warning_error, NodeExecutor};
