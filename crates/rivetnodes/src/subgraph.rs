use crate::graph_io::boundary_id;
use async_trait::async_trait;
use rivetcore::{
    Connection, DataType, GraphId, Node, NodeContext, NodeError, NodeOutput, NodeSpec,
    PortDefinition, Project, GRAPH_INPUT_TYPE, GRAPH_OUTPUT_TYPE,
};
use rivetruntime::{NodeFactory, NodeMetadata};

/// Invokes another graph of the project.
///
/// One input port per `graph.input` node and one output port per
/// `graph.output` node of the referenced graph, named by their `id` config.
pub struct SubgraphNode {
    graph_id: GraphId,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

#[async_trait]
impl Node for SubgraphNode {
    fn node_type(&self) -> &str {
        "graph.subgraph"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        self.inputs
            .iter()
            .map(|id| PortDefinition::new(id.clone(), DataType::Any))
            .collect()
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        self.outputs
            .iter()
            .map(|id| PortDefinition::new(id.clone(), DataType::Any))
            .collect()
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.events
            .info(format!("Invoking graph {}", self.graph_id));
        let outputs = ctx
            .graphs
            .invoke_graph(&self.graph_id, ctx.inputs.clone(), ctx.cancellation.clone())
            .await?;
        Ok(NodeOutput::from(outputs))
    }
}

pub struct SubgraphNodeFactory;

impl NodeFactory for SubgraphNodeFactory {
    fn create(&self, spec: &NodeSpec, project: &Project) -> Result<Box<dyn Node>, NodeError> {
        let graph_id = GraphId::new(
            spec.config_str("graph_id")
                .ok_or_else(|| NodeError::Configuration("Missing config: graph_id".to_string()))?,
        );
        let graph = project.graph(&graph_id).ok_or_else(|| {
            NodeError::Configuration(format!("Referenced graph not found: {}", graph_id))
        })?;

        let boundary = |node_type: &str| -> Vec<String> {
            let mut ids: Vec<String> = graph
                .nodes
                .iter()
                .filter(|n| n.node_type == node_type)
                .map(boundary_id)
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };

        Ok(Box::new(SubgraphNode {
            inputs: boundary(GRAPH_INPUT_TYPE),
            outputs: boundary(GRAPH_OUTPUT_TYPE),
            graph_id,
        }))
    }

    fn node_type(&self) -> &str {
        "graph.subgraph"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Run another graph of the project".to_string(),
            category: "graph".to_string(),
        }
    }
}
