//! Structured per-invocation records surfaced with `NodeFinished` events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::merge::{concat_all, concat_maps, MergeError};
use crate::schema::ConversionWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackError {
    pub level: ErrorLevel,
    pub message: String,
}

impl CallbackError {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: ErrorLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: ErrorLevel::Error,
            message: message.into(),
        }
    }
}

/// What one node invocation produced, as reported to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredCallbackOutput {
    pub output: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallbackError>,
    /// Overrides the recorded input when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<HashMap<String, Value>>,
    /// Text that should enter the conversation context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Replaces `output` in execution history when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_str: Option<String>,
    /// Output fields that were not produced because their source was skipped.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skipped: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ConversionWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredCallbackInput {
    pub input: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

/// Combine the records of repeated invocations of one node, in fan-out order.
///
/// A single record is returned unchanged. Only the last error survives.
pub fn concat_callback_outputs(
    outputs: Vec<StructuredCallbackOutput>,
) -> Result<Option<StructuredCallbackOutput>, MergeError> {
    if outputs.len() <= 1 {
        return Ok(outputs.into_iter().next());
    }

    let mut output_list = Vec::with_capacity(outputs.len());
    let mut raw_list = Vec::new();
    let mut extra_list = Vec::new();
    let mut input_list = Vec::new();
    let mut answer_list = Vec::new();
    let mut output_str_list = Vec::new();
    let mut error = None;
    let mut skipped = BTreeSet::new();
    let mut warnings = Vec::new();

    for o in outputs {
        output_list.push(o.output);
        raw_list.extend(o.raw_output);
        if !o.extra.is_empty() {
            extra_list.push(o.extra);
        }
        input_list.extend(o.input);
        answer_list.extend(o.answer);
        output_str_list.extend(o.output_str);
        if o.error.is_some() {
            error = o.error;
        }
        skipped.extend(o.skipped);
        warnings.extend(o.warnings);
    }

    let output = concat_maps(output_list)?;
    skipped.retain(|k| !output.contains_key(k));

    Ok(Some(StructuredCallbackOutput {
        raw_output: concat_all(raw_list)?,
        extra: concat_maps(extra_list)?,
        input: concat_all(input_list)?,
        answer: concat_all(answer_list)?,
        output_str: concat_all(output_str_list)?,
        error,
        skipped,
        warnings,
        output,
    }))
}

pub fn concat_callback_inputs(
    inputs: Vec<StructuredCallbackInput>,
) -> Result<Option<StructuredCallbackInput>, MergeError> {
    if inputs.len() <= 1 {
        return Ok(inputs.into_iter().next());
    }

    let mut input_list = Vec::with_capacity(inputs.len());
    let mut extra_list = Vec::new();
    for i in inputs {
        input_list.push(i.input);
        if !i.extra.is_empty() {
            extra_list.push(i.extra);
        }
    }

    Ok(Some(StructuredCallbackInput {
        input: concat_maps(input_list)?,
        extra: concat_maps(extra_list)?,
    }))
}
