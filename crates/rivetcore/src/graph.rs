use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random id
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a node, unique within its graph
    NodeId
);
string_id!(
    /// Identifier of a graph, unique within its project
    GraphId
);
string_id!(ProjectId);

/// A project owns every graph the engine can run or invoke as a subgraph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub graphs: BTreeMap<GraphId, Graph>,
}

impl Project {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            metadata: ProjectMetadata {
                id: ProjectId::generate(),
                title: title.into(),
                description: String::new(),
                main_graph_id: None,
            },
            graphs: BTreeMap::new(),
        }
    }

    pub fn add_graph(&mut self, graph: Graph) -> GraphId {
        let id = graph.id.clone();
        if self.metadata.main_graph_id.is_none() {
            self.metadata.main_graph_id = Some(id.clone());
        }
        self.graphs.insert(id.clone(), graph);
        id
    }

    pub fn graph(&self, id: &GraphId) -> Option<&Graph> {
        self.graphs.get(id)
    }

    /// The graph a bare "run" targets: the declared main graph, or the only graph
    pub fn main_graph(&self) -> Option<&Graph> {
        match &self.metadata.main_graph_id {
            Some(id) => self.graphs.get(id),
            None if self.graphs.len() == 1 => self.graphs.values().next(),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub main_graph_id: Option<GraphId>,
}

/// Nodes plus the wires between them. Read-only while it executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: GraphId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(GraphId::generate(), name)
    }

    pub fn with_id(id: impl Into<GraphId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(
        &mut self,
        output_node_id: impl Into<NodeId>,
        output_id: impl Into<String>,
        input_node_id: impl Into<NodeId>,
        input_id: impl Into<String>,
    ) {
        self.connections.push(Connection {
            output_node_id: output_node_id.into(),
            output_id: output_id.into(),
            input_node_id: input_node_id.into(),
            input_id: input_id.into(),
        });
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Connections feeding into `node`
    pub fn incoming(&self, node: &NodeId) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| &c.input_node_id == node)
            .cloned()
            .collect()
    }

    /// Connections leaving `node`
    pub fn outgoing(&self, node: &NodeId) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| &c.output_node_id == node)
            .cloned()
            .collect()
    }
}

/// Node specification inside a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Run once per element of array-valued inputs
    #[serde(default)]
    pub is_split_run: bool,
    /// Upper bound on split instances
    #[serde(default)]
    pub split_run_max: Option<usize>,
    /// Run split instances one at a time, in index order
    #[serde(default)]
    pub split_sequential: bool,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Editor-only data, ignored by the engine
    #[serde(default)]
    pub visual: Option<VisualData>,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self::with_id(NodeId::generate(), node_type)
    }

    pub fn with_id(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            title: None,
            is_split_run: false,
            split_run_max: None,
            split_sequential: false,
            config: HashMap::new(),
            visual: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.visual = Some(VisualData { x, y, width: None });
        self
    }

    pub fn split_run(mut self) -> Self {
        self.is_split_run = true;
        self
    }

    pub fn with_split_max(mut self, max: usize) -> Self {
        self.split_run_max = Some(max);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.split_sequential = true;
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// Directed wire from one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub output_node_id: NodeId,
    pub output_id: String,
    pub input_node_id: NodeId,
    pub input_id: String,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.output_node_id, self.output_id, self.input_node_id, self.input_id
        )
    }
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VisualData {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub width: Option<f32>,
}

/// Address of a single port: `(node, port)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub node_id: NodeId,
    pub port_id: String,
}

impl PortRef {
    pub fn new(node_id: impl Into<NodeId>, port_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            port_id: port_id.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_id, self.port_id)
    }
}

/// Values supplied by the caller for input ports that have no incoming wire
pub type ExternalInputs = HashMap<PortRef, Value>;
