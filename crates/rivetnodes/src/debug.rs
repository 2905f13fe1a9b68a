use async_trait::async_trait;
use rivetcore::{
    Connection, DataType, Node, NodeContext, NodeError, NodeOutput, NodeSpec, PortDefinition,
    Project, Value,
};
use rivetruntime::{NodeFactory, NodeMetadata};

/// Logs its input and passes it through unchanged
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let label = ctx
            .config
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("debug")
            .to_string();
        let value = ctx.inputs.get("value").cloned().unwrap_or(Value::Null);

        let rendered = value.to_plain_json().to_string();
        tracing::info!("[{}] {}: {}", ctx.instance, label, rendered);
        ctx.events.info(format!("{}: {}", label, rendered));

        Ok(NodeOutput::new().with_output("value", value))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, _spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DebugNode))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs its input value for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
