use crate::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type tag of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array(Box<DataType>),
}

impl DataType {
    pub fn array_of(inner: DataType) -> Self {
        DataType::Array(Box::new(inner))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, DataType::Array(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Any => f.write_str("any"),
            DataType::String => f.write_str("string"),
            DataType::Number => f.write_str("number"),
            DataType::Boolean => f.write_str("boolean"),
            DataType::Object => f.write_str("object"),
            DataType::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}

/// One input or output slot a node exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub id: String,
    pub title: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

impl PortDefinition {
    pub fn new(id: impl Into<String>, data_type: DataType) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            data_type,
            required: false,
            default: None,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Port sets of one node, computed against the current connections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePorts {
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl NodePorts {
    pub fn input(&self, id: &str) -> Option<&PortDefinition> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&PortDefinition> {
        self.outputs.iter().find(|p| p.id == id)
    }
}
