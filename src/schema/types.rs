//! Type descriptors and input/output bindings shared by every node schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key of a node, unique within its owning workflow schema.
pub type NodeKey = String;

/// Primitive shape of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    Time,
    Object,
    Array,
    File,
}

/// Modality hint carried by file-typed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSubType {
    Default,
    Image,
    Audio,
    Video,
    Doc,
}

/// Declared type of an input or output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Element type for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elem: Option<Box<TypeInfo>>,
    /// Field types for objects.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, TypeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileSubType>,
}

impl TypeInfo {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            required: false,
            description: None,
            elem: None,
            properties: BTreeMap::new(),
            file_type: None,
        }
    }

    pub fn string() -> Self {
        Self::new(DataType::String)
    }

    pub fn array_of(elem: TypeInfo) -> Self {
        Self {
            elem: Some(Box::new(elem)),
            ..Self::new(DataType::Array)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_file(&self) -> bool {
        self.data_type == DataType::File
    }
}

/// Reference to another node's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub from_node_key: NodeKey,
    /// Path into the referenced node's output map; the first segment names the output port.
    #[serde(default)]
    pub from_path: Vec<String>,
}

impl NodeRef {
    pub fn new(from_node_key: impl Into<String>, path: &[&str]) -> Self {
        Self {
            from_node_key: from_node_key.into(),
            from_path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Walk `from_path` through a node's output map.
    pub fn lookup<'a>(&self, output: &'a std::collections::HashMap<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.from_path.split_first()?;
        let mut current = output.get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Where an input field gets its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Literal(Value),
    Ref(NodeRef),
}

/// One named input (or output) binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub source: FieldSource,
}

impl FieldMapping {
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            source: FieldSource::Literal(value),
        }
    }

    pub fn reference(name: impl Into<String>, from_node_key: impl Into<String>, path: &[&str]) -> Self {
        Self {
            name: name.into(),
            source: FieldSource::Ref(NodeRef::new(from_node_key, path)),
        }
    }

    pub fn node_ref(&self) -> Option<&NodeRef> {
        match &self.source {
            FieldSource::Ref(r) => Some(r),
            FieldSource::Literal(_) => None,
        }
    }
}
