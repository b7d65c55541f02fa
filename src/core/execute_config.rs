//! Run-scoped configuration. Immutable for the duration of one run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteLocator {
    #[default]
    Draft,
    SpecificVersion,
    Latest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMode {
    Debug,
    #[default]
    Release,
    NodeDebug,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPattern {
    #[default]
    Sync,
    Async,
    Stream,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BizType {
    #[default]
    Workflow,
    Agent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    #[default]
    Workflow,
    ChatFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// An uploaded file referenced by a workflow input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_url: String,
    pub file_name: String,
    /// Extension including the leading dot, empty when the name has none.
    pub file_extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteConfig {
    /// Execute id to use; 0 mints a fresh one.
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub locator: ExecuteLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(default)]
    pub operator: i64,
    #[serde(default)]
    pub mode: ExecuteMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub connector_id: i64,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub sync_pattern: SyncPattern,
    #[serde(default)]
    pub input_fail_fast: bool,
    #[serde(default)]
    pub biz_type: BizType,
    #[serde(default = "default_cancellable")]
    pub cancellable: bool,
    #[serde(default)]
    pub workflow_mode: WorkflowMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    /// Oldest first.
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    /// Cap on the history window any node may read; `None` leaves it to the nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history_rounds: Option<u32>,
    #[serde(default)]
    pub input_file_fields: HashMap<String, FileInfo>,
}

fn default_cancellable() -> bool {
    true
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self {
            id: 0,
            locator: ExecuteLocator::default(),
            version: None,
            commit_id: None,
            operator: 0,
            mode: ExecuteMode::default(),
            app_id: None,
            agent_id: None,
            connector_id: 0,
            task_type: TaskType::default(),
            sync_pattern: SyncPattern::default(),
            input_fail_fast: false,
            biz_type: BizType::default(),
            cancellable: default_cancellable(),
            workflow_mode: WorkflowMode::default(),
            round_id: None,
            conversation_id: None,
            section_id: None,
            user_message: None,
            conversation_history: Vec::new(),
            max_history_rounds: None,
            input_file_fields: HashMap::new(),
        }
    }
}

impl ExecuteConfig {
    /// Resume data for agent and chat-flow runs arrives as `key:value` lines.
    pub fn uses_line_resume(&self) -> bool {
        self.biz_type == BizType::Agent || self.workflow_mode == WorkflowMode::ChatFlow
    }

    pub fn is_streaming(&self) -> bool {
        self.sync_pattern == SyncPattern::Stream
    }
}
