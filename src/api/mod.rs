//! Running compiled workflows.

mod handle;
mod runner;

pub use handle::WorkflowHandle;
pub use runner::WorkflowRunnerBuilder;
