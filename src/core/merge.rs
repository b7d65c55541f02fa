//! Structural concatenation of partial results.
//!
//! When one logical node runs several times (batch items, loop iterations,
//! streamed chunks) its partial outputs are folded together in order with
//! [`Concat`]. Strings and arrays append, maps merge key by key, and nothing
//! from a later part is silently dropped.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    #[error("cannot merge {left} with {right} at '{path}'")]
    Incompatible {
        path: String,
        left: String,
        right: String,
    },
}

impl MergeError {
    fn incompatible(left: &Value, right: &Value) -> Self {
        MergeError::Incompatible {
            path: String::new(),
            left: short(left),
            right: short(right),
        }
    }

    /// Prefix the error path with an enclosing key.
    pub fn within(self, key: &str) -> Self {
        match self {
            MergeError::Incompatible { path, left, right } => MergeError::Incompatible {
                path: if path.is_empty() {
                    key.to_string()
                } else {
                    format!("{}.{}", key, path)
                },
                left,
                right,
            },
        }
    }
}

fn short(value: &Value) -> String {
    let mut s = value.to_string();
    if s.len() > 64 {
        let cut = (0..=61).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

/// Append `other` after `self`.
pub trait Concat: Sized {
    fn concat(self, other: Self) -> Result<Self, MergeError>;
}

impl Concat for String {
    fn concat(mut self, other: Self) -> Result<Self, MergeError> {
        self.push_str(&other);
        Ok(self)
    }
}

impl<T> Concat for Vec<T> {
    fn concat(mut self, other: Self) -> Result<Self, MergeError> {
        self.extend(other);
        Ok(self)
    }
}

impl<T: Concat> Concat for Option<T> {
    fn concat(self, other: Self) -> Result<Self, MergeError> {
        match (self, other) {
            (Some(a), Some(b)) => a.concat(b).map(Some),
            (a, None) => Ok(a),
            (None, b) => Ok(b),
        }
    }
}

impl<K, V> Concat for HashMap<K, V>
where
    K: Eq + Hash + AsRef<str>,
    V: Concat,
{
    fn concat(mut self, other: Self) -> Result<Self, MergeError> {
        for (key, value) in other {
            let merged = match self.remove(&key) {
                Some(existing) => existing
                    .concat(value)
                    .map_err(|e| e.within(key.as_ref()))?,
                None => value,
            };
            self.insert(key, merged);
        }
        Ok(self)
    }
}

impl Concat for Value {
    fn concat(self, other: Self) -> Result<Self, MergeError> {
        match (self, other) {
            (Value::Null, b) => Ok(b),
            (a, Value::Null) => Ok(a),
            (Value::String(a), Value::String(b)) => a.concat(b).map(Value::String),
            (Value::Array(a), Value::Array(b)) => a.concat(b).map(Value::Array),
            (Value::Object(a), Value::Object(b)) => merge_objects(a, b).map(Value::Object),
            (a, b) if a == b => Ok(a),
            (a, b) => Err(MergeError::incompatible(&a, &b)),
        }
    }
}

fn merge_objects(mut a: Map<String, Value>, b: Map<String, Value>) -> Result<Map<String, Value>, MergeError> {
    for (key, value) in b {
        let merged = match a.remove(&key) {
            Some(existing) => existing.concat(value).map_err(|e| e.within(&key))?,
            None => value,
        };
        a.insert(key, merged);
    }
    Ok(a)
}

/// Fold an ordered list; `None` for an empty list.
pub fn concat_all<T: Concat>(items: impl IntoIterator<Item = T>) -> Result<Option<T>, MergeError> {
    let mut iter = items.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    iter.try_fold(first, |acc, item| acc.concat(item)).map(Some)
}

/// Merge field maps key by key, in order.
pub fn concat_maps(
    maps: impl IntoIterator<Item = HashMap<String, Value>>,
) -> Result<HashMap<String, Value>, MergeError> {
    Ok(concat_all(maps)?.unwrap_or_default())
}
