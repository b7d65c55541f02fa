//! Permissive conversion of loosely-typed JSON toward declared field types.
//!
//! Values that cannot be coerced are dropped and reported as warnings instead
//! of failing the node.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;

use super::types::{DataType, TypeInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UnknownField,
    TypeMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionWarning {
    /// Dotted path of the offending field; array elements appear as `[i]`.
    pub path: String,
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for ConversionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Join warnings into one line for logging and error messages.
pub fn describe_warnings(warnings: &[ConversionWarning]) -> String {
    warnings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convert every field of `input` toward its declared type.
///
/// Fields without a declared type are dropped with a warning when
/// `skip_unknown` is set, and passed through untouched otherwise.
pub fn convert_fields(
    input: &HashMap<String, Value>,
    types: &HashMap<String, TypeInfo>,
    skip_unknown: bool,
) -> (HashMap<String, Value>, Vec<ConversionWarning>) {
    let mut warnings = Vec::new();
    let mut output = HashMap::with_capacity(input.len());
    for (name, value) in input {
        match types.get(name) {
            Some(info) => {
                if let Some(converted) = convert_value(value, info, name, skip_unknown, &mut warnings)
                {
                    output.insert(name.clone(), converted);
                }
            }
            None if skip_unknown => warnings.push(ConversionWarning {
                path: name.clone(),
                kind: WarningKind::UnknownField,
                message: "field is not declared".to_string(),
            }),
            None => {
                output.insert(name.clone(), value.clone());
            }
        }
    }
    warnings.sort_by(|a, b| a.path.cmp(&b.path));
    (output, warnings)
}

/// Convert a single value; `None` means the value was dropped and a warning recorded.
pub fn convert_value(
    value: &Value,
    info: &TypeInfo,
    path: &str,
    skip_unknown: bool,
    warnings: &mut Vec<ConversionWarning>,
) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }

    let converted = match info.data_type {
        DataType::String | DataType::Time | DataType::File => to_string_value(value),
        DataType::Integer => to_integer(value),
        DataType::Number => to_number(value),
        DataType::Boolean => to_boolean(value),
        DataType::Object => {
            return convert_object(value, info, path, skip_unknown, warnings);
        }
        DataType::Array => {
            return convert_array(value, info, path, skip_unknown, warnings);
        }
    };

    if converted.is_none() {
        warnings.push(mismatch(path, info.data_type, value));
    }
    converted
}

fn convert_object(
    value: &Value,
    info: &TypeInfo,
    path: &str,
    skip_unknown: bool,
    warnings: &mut Vec<ConversionWarning>,
) -> Option<Value> {
    let parsed;
    let map = match value {
        Value::Object(map) => map,
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => {
                parsed = map;
                &parsed
            }
            _ => {
                warnings.push(mismatch(path, DataType::Object, value));
                return None;
            }
        },
        _ => {
            warnings.push(mismatch(path, DataType::Object, value));
            return None;
        }
    };

    if info.properties.is_empty() {
        return Some(Value::Object(map.clone()));
    }

    let mut out = Map::new();
    for (name, field) in map {
        let field_path = format!("{}.{}", path, name);
        match info.properties.get(name) {
            Some(field_info) => {
                if let Some(v) = convert_value(field, field_info, &field_path, skip_unknown, warnings)
                {
                    out.insert(name.clone(), v);
                }
            }
            None if skip_unknown => warnings.push(ConversionWarning {
                path: field_path,
                kind: WarningKind::UnknownField,
                message: "field is not declared".to_string(),
            }),
            None => {
                out.insert(name.clone(), field.clone());
            }
        }
    }
    Some(Value::Object(out))
}

fn convert_array(
    value: &Value,
    info: &TypeInfo,
    path: &str,
    skip_unknown: bool,
    warnings: &mut Vec<ConversionWarning>,
) -> Option<Value> {
    let parsed;
    let items = match value {
        Value::Array(items) => items,
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => {
                parsed = items;
                &parsed
            }
            _ => {
                warnings.push(mismatch(path, DataType::Array, value));
                return None;
            }
        },
        _ => {
            warnings.push(mismatch(path, DataType::Array, value));
            return None;
        }
    };

    let Some(elem) = info.elem.as_deref() else {
        return Some(Value::Array(items.clone()));
    };
    let out = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            convert_value(item, elem, &format!("{}[{}]", path, i), skip_unknown, warnings)
        })
        .collect();
    Some(Value::Array(out))
}

fn to_string_value(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value).ok().map(Value::String),
        Value::Null => Some(Value::Null),
    }
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| Value::Number(Number::from(f as i64))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::Number(Number::from(i)));
            }
            s.parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| Value::Number(Number::from(f as i64)))
        }
        _ => None,
    }
}

fn to_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn to_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn mismatch(path: &str, expected: DataType, value: &Value) -> ConversionWarning {
    ConversionWarning {
        path: path.to_string(),
        kind: WarningKind::TypeMismatch,
        message: format!("cannot convert {} to {:?}", kind_name(value), expected),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
