//! Typed schema of a compiled workflow graph.

pub mod branch;
pub mod config;
pub mod convert;
pub mod hierarchy;
pub mod node;
pub mod streaming;
pub mod types;
pub mod workflow;

pub use branch::{BranchSchema, SELECTED_FIELD};
pub use config::NodeConfig;
pub use convert::{convert_fields, ConversionWarning, WarningKind};
pub use hierarchy::Hierarchy;
pub use node::{
    ErrorProcessType, ExceptionConfig, NodeSchema, NodeType, StreamConfigs, SubWorkflowBasic,
};
pub use types::{DataType, FieldMapping, FieldSource, FileSubType, NodeKey, NodeRef, TypeInfo};
pub use workflow::{CompositeNode, Connection, WorkflowSchema};
