pub mod callback;
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod event_bus;
pub mod execute_config;
pub mod execution_context;
pub mod id_generator;
pub mod interrupt;
pub mod merge;
pub mod status;

pub use callback::{CallbackError, ErrorLevel, StructuredCallbackInput, StructuredCallbackOutput};
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointState, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use collaborators::{Collaborators, CollaboratorsBuilder};
pub use config::EngineConfig;
pub use dispatcher::{ScopeDispatcher, ScopeOutcome};
pub use event_bus::{EventEmitter, WorkflowEvent};
pub use execute_config::{ChatMessage, ChatRole, ExecuteConfig, FileInfo};
pub use execution_context::ExecutionContext;
pub use id_generator::{FakeIdGenerator, IdGenError, IdGenerator, SnowflakeIdGenerator};
pub use interrupt::{InterruptEvent, InterruptEventType, NodeOutcome, NodeOutput};
pub use status::ExecutionStatus;
