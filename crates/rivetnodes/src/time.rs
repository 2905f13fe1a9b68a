use async_trait::async_trait;
use rivetcore::{
    Connection, DataType, Node, NodeContext, NodeError, NodeOutput, NodeSpec, PortDefinition,
    Project, Value,
};
use rivetruntime::{NodeFactory, NodeMetadata};
use tokio::time::{sleep, Duration};

/// Waits `delay_ms` (default one second), then passes its input through.
/// Stops early with [`NodeError::Cancelled`] when the execution is cancelled.
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = ctx
            .get_config_or("delay_ms", Value::Number(1000.0))
            .as_f64()
            .unwrap_or(1000.0)
            .max(0.0) as u64;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        let value = ctx.inputs.get("value").cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_output("value", value))
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, _spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay for the configured number of milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
