use async_trait::async_trait;
use rivetcore::{
    Connection, DataType, Node, NodeContext, NodeError, NodeOutput, NodeSpec, PortDefinition,
    Project, Value,
};
use rivetruntime::{NodeFactory, NodeMetadata};

/// Index of a variadic `inputN` port
fn port_index(port: &str) -> Option<usize> {
    port.strip_prefix("input")?.parse().ok().filter(|n| *n > 0)
}

/// Collects `input1..inputN` into one array.
///
/// There is always one more input port than the highest connected one, so a
/// new wire can be attached. With `flatten` (default on) array inputs are
/// spliced in rather than nested.
pub struct ArrayMergeNode {
    flatten: bool,
}

#[async_trait]
impl Node for ArrayMergeNode {
    fn node_type(&self) -> &str {
        "array.merge"
    }

    fn input_definitions(&self, incoming: &[Connection]) -> Vec<PortDefinition> {
        let highest = incoming
            .iter()
            .filter_map(|c| port_index(&c.input_id))
            .max()
            .unwrap_or(0);
        (1..=highest + 1)
            .map(|n| PortDefinition::new(format!("input{}", n), DataType::Any))
            .collect()
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("output", DataType::array_of(DataType::Any))]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut ports: Vec<(usize, &Value)> = ctx
            .inputs
            .iter()
            .filter_map(|(port, value)| Some((port_index(port)?, value)))
            .collect();
        ports.sort_by_key(|(index, _)| *index);

        let mut merged = Vec::new();
        for (_, value) in ports {
            match value {
                Value::Array(items) if self.flatten => merged.extend(items.iter().cloned()),
                other => merged.push(other.clone()),
            }
        }
        Ok(NodeOutput::new().with_output("output", Value::Array(merged)))
    }
}

pub struct ArrayMergeNodeFactory;

impl NodeFactory for ArrayMergeNodeFactory {
    fn create(&self, spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        let flatten = spec
            .config
            .get("flatten")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(Box::new(ArrayMergeNode { flatten }))
    }

    fn node_type(&self) -> &str {
        "array.merge"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Merge any number of inputs into one array".to_string(),
            category: "array".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(input: &str) -> Connection {
        Connection {
            output_node_id: "src".into(),
            output_id: "out".to_string(),
            input_node_id: "merge".into(),
            input_id: input.to_string(),
        }
    }

    #[test]
    fn ports_grow_with_connections() {
        let node = ArrayMergeNode { flatten: true };
        let ids = |incoming: &[Connection]| -> Vec<String> {
            node.input_definitions(incoming)
                .into_iter()
                .map(|d| d.id)
                .collect()
        };

        assert_eq!(ids(&[]), vec!["input1"]);
        assert_eq!(ids(&[wire("input1")]), vec!["input1", "input2"]);
        assert_eq!(
            ids(&[wire("input3"), wire("input1")]),
            vec!["input1", "input2", "input3", "input4"]
        );
    }

    #[test]
    fn port_names_parse() {
        assert_eq!(port_index("input12"), Some(12));
        assert_eq!(port_index("input0"), None);
        assert_eq!(port_index("output1"), None);
    }
}
