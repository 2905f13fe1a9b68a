//! Boundary nodes through which a graph receives invocation inputs and
//! publishes its results.

use async_trait::async_trait;
use rivetcore::{
    Connection, DataType, Node, NodeContext, NodeError, NodeOutput, NodeSpec, PortDefinition,
    Project, Value, GRAPH_INPUT_TYPE, GRAPH_OUTPUT_TYPE,
};
use rivetruntime::{NodeFactory, NodeMetadata};

/// The name a boundary node is addressed by: its `id` config, else its node id
pub(crate) fn boundary_id(spec: &NodeSpec) -> String {
    spec.config_str("id")
        .unwrap_or(spec.id.as_str())
        .to_string()
}

/// Emits the graph invocation input named by its `id` config on `data`.
///
/// Resolution order: the invocation input, then a value wired or supplied on
/// `value`. The `default` config is declared as the default of `value`.
pub struct GraphInputNode {
    id: String,
    default: Option<Value>,
}

#[async_trait]
impl Node for GraphInputNode {
    fn node_type(&self) -> &str {
        GRAPH_INPUT_TYPE
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        let port = PortDefinition::new("value", DataType::Any)
            .with_description("Used when the graph is run without an invocation input");
        match &self.default {
            Some(default) => vec![port.with_default(default.clone())],
            None => vec![port],
        }
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("data", DataType::Any).with_title(self.id.clone())]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx
            .graph_inputs
            .get(&self.id)
            .or_else(|| ctx.inputs.get("value"))
            .cloned()
            .ok_or_else(|| NodeError::MissingInput {
                port: self.id.clone(),
            })?;
        Ok(NodeOutput::new().with_output("data", value))
    }
}

pub struct GraphInputNodeFactory;

impl NodeFactory for GraphInputNodeFactory {
    fn create(&self, spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(GraphInputNode {
            id: boundary_id(spec),
            default: spec.config.get("default").cloned(),
        }))
    }

    fn node_type(&self) -> &str {
        GRAPH_INPUT_TYPE
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Read an input the graph was invoked with".to_string(),
            category: "graph".to_string(),
        }
    }
}

/// Publishes `value` as the graph output named by its `id` config
pub struct GraphOutputNode;

#[async_trait]
impl Node for GraphOutputNode {
    fn node_type(&self) -> &str {
        GRAPH_OUTPUT_TYPE
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any).required()]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_input("value")?.clone();
        Ok(NodeOutput::new().with_output("value", value))
    }
}

pub struct GraphOutputNodeFactory;

impl NodeFactory for GraphOutputNodeFactory {
    fn create(&self, _spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(GraphOutputNode))
    }

    fn node_type(&self) -> &str {
        GRAPH_OUTPUT_TYPE
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Publish a graph result".to_string(),
            category: "graph".to_string(),
        }
    }
}
