use crate::{
    events::EventEmitter, CodeRunner, Connection, GraphId, NodeError, NodeId, NodeInstanceId,
    PortDefinition, Value,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Type tag of the node that reads a graph invocation input
pub const GRAPH_INPUT_TYPE: &str = "graph.input";
/// Type tag of the node that publishes a graph result
pub const GRAPH_OUTPUT_TYPE: &str = "graph.output";

/// Core trait that every node kind implements.
///
/// Port sets are recomputed from the live connections on every execution and
/// must not be cached by the implementation.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g. "math.sum", "code")
    fn node_type(&self) -> &str;

    /// Input ports, given the connections that currently feed this node
    fn input_definitions(&self, incoming: &[Connection]) -> Vec<PortDefinition>;

    /// Output ports, given the connections that currently leave this node
    fn output_definitions(&self, outgoing: &[Connection]) -> Vec<PortDefinition>;

    /// Compute outputs from resolved inputs. Must not touch graph state.
    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Runs another graph of the same project from inside a node
#[async_trait]
pub trait GraphInvoker: Send + Sync {
    /// Execute `graph_id` with the given `graph.input` values and return its
    /// `graph.output` values
    async fn invoke_graph(
        &self,
        graph_id: &GraphId,
        inputs: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<HashMap<String, Value>, NodeError>;
}

/// Execution context passed to each node instance
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    /// Aggregate node or split instance being computed
    pub instance: NodeInstanceId,

    /// Resolved input port values
    pub inputs: HashMap<String, Value>,

    /// Static configuration for this node
    pub config: HashMap<String, Value>,

    /// Values the enclosing graph was invoked with
    pub graph_inputs: Arc<HashMap<String, Value>>,

    pub events: EventEmitter,

    /// Cooperative cancellation; the engine never interrupts a running compute
    pub cancellation: CancellationToken,

    pub code_runner: Arc<dyn CodeRunner>,

    pub graphs: Arc<dyn GraphInvoker>,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs.get(name).ok_or_else(|| NodeError::MissingInput {
            port: name.to_string(),
        })
    }

    pub fn require_number(&self, name: &str) -> Result<f64, NodeError> {
        let value = self.require_input(name)?;
        value.as_f64().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "number".to_string(),
            actual: value.data_type().to_string(),
        })
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }
}

impl From<HashMap<String, Value>> for NodeOutput {
    fn from(outputs: HashMap<String, Value>) -> Self {
        Self { outputs }
    }
}
