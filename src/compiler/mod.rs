pub mod cache;
pub mod compiled_workflow;
pub mod compiler;

pub use cache::{CacheKey, CacheStats, CompiledWorkflowCache};
pub use compiled_workflow::{CompiledWorkflow, Scope, ScopeNode};
pub use compiler::{BuildContext, WorkflowCompiler};
