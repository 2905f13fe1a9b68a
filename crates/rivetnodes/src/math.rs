use async_trait::async_trait;
use rivetcore::{
    Connection, DataType, Node, NodeContext, NodeError, NodeOutput, NodeSpec, PortDefinition,
    Project, Value,
};
use rivetruntime::{NodeFactory, NodeMetadata};

/// Multiplies `value` by two
pub struct DoubleNode;

#[async_trait]
impl Node for DoubleNode {
    fn node_type(&self) -> &str {
        "math.double"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Number).required()]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("result", DataType::Number)]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_number("value")?;
        Ok(NodeOutput::new().with_output("result", value * 2.0))
    }
}

pub struct DoubleNodeFactory;

impl NodeFactory for DoubleNodeFactory {
    fn create(&self, _spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DoubleNode))
    }

    fn node_type(&self) -> &str {
        "math.double"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Multiply a number by two".to_string(),
            category: "math".to_string(),
        }
    }
}

/// Adds up an array of numbers
pub struct SumNode;

#[async_trait]
impl Node for SumNode {
    fn node_type(&self) -> &str {
        "math.sum"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("numbers", DataType::array_of(DataType::Number)).required()]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("sum", DataType::Number)]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_input("numbers")?;
        let items = input.as_array().ok_or_else(|| NodeError::InvalidInputType {
            field: "numbers".to_string(),
            expected: "array".to_string(),
            actual: input.data_type().to_string(),
        })?;

        let mut sum = 0.0;
        for item in items {
            sum += item.as_f64().ok_or_else(|| NodeError::InvalidInputType {
                field: "numbers".to_string(),
                expected: "number".to_string(),
                actual: item.data_type().to_string(),
            })?;
        }
        Ok(NodeOutput::new().with_output("sum", Value::Number(sum)))
    }
}

pub struct SumNodeFactory;

impl NodeFactory for SumNodeFactory {
    fn create(&self, _spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SumNode))
    }

    fn node_type(&self) -> &str {
        "math.sum"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Sum an array of numbers".to_string(),
            category: "math".to_string(),
        }
    }
}
