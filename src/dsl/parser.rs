//! Canvas parser: YAML, JSON or TOML text into a [`Canvas`].

use serde_json::Value;

use super::adapter::adapt_canvas;
use super::canvas::Canvas;
use crate::error::{WorkflowError, WorkflowResult};
use crate::schema::WorkflowSchema;

/// Supported canvas formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DslFormat {
    Yaml,
    Json,
    Toml,
}

impl DslFormat {
    /// Format for a file extension such as `yml` or `.json`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(DslFormat::Yaml),
            "json" => Some(DslFormat::Json),
            "toml" => Some(DslFormat::Toml),
            _ => None,
        }
    }
}

/// Parse canvas text.
///
/// Every format goes through [`serde_json::Value`] first, so tagged values
/// such as `{ref: {...}}` read the same in all three.
pub fn parse_canvas(content: &str, format: DslFormat) -> WorkflowResult<Canvas> {
    let value: Value = match format {
        DslFormat::Yaml => serde_yaml::from_str(content).map_err(parse_error)?,
        DslFormat::Json => serde_json::from_str(content).map_err(parse_error)?,
        DslFormat::Toml => {
            let table: toml::Value = toml::from_str(content).map_err(parse_error)?;
            toml_to_json(table)
        }
    };
    serde_json::from_value(value).map_err(parse_error)
}

/// Parse and adapt in one step.
pub fn load_workflow(content: &str, format: DslFormat) -> WorkflowResult<WorkflowSchema> {
    adapt_canvas(&parse_canvas(content, format)?)
}

fn parse_error(e: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::DslParseError(e.to_string())
}

/// TOML has no null; datetimes become strings.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect())
        }
    }
}
