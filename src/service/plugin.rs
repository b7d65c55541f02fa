use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ServiceError;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteToolRequest {
    pub plugin_id: i64,
    pub tool_id: i64,
    pub plugin_version: Option<String>,
    pub arguments_json: String,
    pub options: ToolOptions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOptions {
    pub execute_id: i64,
    pub operator: i64,
    /// Set when re-executing after the user answered an earlier interrupt.
    pub resumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolInterruptKind {
    NeedOAuth,
}

/// The tool cannot finish until the user acts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInterrupt {
    pub kind: ToolInterruptKind,
    /// Opaque payload for the client, e.g. the authorization URL.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolResponse {
    Completed { result_json: String },
    Interrupted(ToolInterrupt),
}

#[async_trait]
pub trait PluginService: Send + Sync {
    async fn execute_tool(&self, request: ExecuteToolRequest) -> Result<ToolResponse, ServiceError>;
}
