use async_trait::async_trait;
use rivetcore::{
    CodeRunnerOptions, Connection, DataType, Node, NodeContext, NodeError, NodeOutput, NodeSpec,
    PortDefinition, Project, Value,
};
use rivetruntime::{NodeFactory, NodeMetadata};
use std::collections::HashMap;

fn names(spec: &NodeSpec, key: &str, fallback: &str) -> Result<Vec<String>, NodeError> {
    let names = match spec.config.get(key) {
        None => vec![fallback.to_string()],
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    NodeError::Configuration(format!("{} must contain only strings", key))
                })
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(NodeError::Configuration(format!(
                "{} must be a string or an array, got {}",
                key,
                other.data_type()
            )))
        }
    };
    Ok(names)
}

/// Runs a user-authored snippet through the injected code runner.
///
/// Config: `code`, `input_names` / `output_names` (array or comma-separated,
/// default `input` / `output`), and the capability flags `include_require`,
/// `include_fetch`, `include_rivet`, `include_process`, all denied unless set.
/// The snippet sees its inputs as the `inputs` map and returns a map of outputs.
pub struct CodeNode {
    code: String,
    input_names: Vec<String>,
    output_names: Vec<String>,
    options: CodeRunnerOptions,
}

#[async_trait]
impl Node for CodeNode {
    fn node_type(&self) -> &str {
        "code"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        self.input_names
            .iter()
            .map(|name| PortDefinition::new(name.clone(), DataType::Any))
            .collect()
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        self.output_names
            .iter()
            .map(|name| PortDefinition::new(name.clone(), DataType::Any))
            .collect()
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        tracing::debug!(
            "Running code for {} on the {} backend with {:?}",
            ctx.instance,
            ctx.code_runner.name(),
            self.options.requested()
        );
        let mut returned = ctx
            .code_runner
            .run_code(&self.code, ctx.inputs.clone(), self.options)
            .await?;

        let mut outputs = HashMap::new();
        for name in &self.output_names {
            match returned.remove(name) {
                Some(value) => {
                    outputs.insert(name.clone(), value);
                }
                None => {
                    ctx.events.warn(format!("Code did not return output '{}'", name));
                    outputs.insert(name.clone(), Value::Null);
                }
            }
        }
        Ok(NodeOutput::from(outputs))
    }
}

pub struct CodeNodeFactory;

impl NodeFactory for CodeNodeFactory {
    fn create(&self, spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        let code = spec
            .config_str("code")
            .ok_or_else(|| NodeError::Configuration("Missing config: code".to_string()))?
            .to_string();
        Ok(Box::new(CodeNode {
            code,
            input_names: names(spec, "input_names", "input")?,
            output_names: names(spec, "output_names", "output")?,
            options: CodeRunnerOptions::from_config(&spec.config),
        }))
    }

    fn node_type(&self) -> &str {
        "code"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Run a sandboxed code snippet".to_string(),
            category: "code".to_string(),
        }
    }
}
