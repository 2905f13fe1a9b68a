// Test node kinds shared by the runtime integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use rivetcore::{
    Connection, DataType, EventBus, Node, NodeContext, NodeError, NodeOutput, NodeSpec,
    PortDefinition, Project, Value,
};
use rivetruntime::{GraphExecutor, NodeFactory, NodeRegistry, RuntimeConfig};
use rivetsandbox::DisabledCodeRunner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Barrier, Notify};

/// Shared instrumentation for `test.probe` nodes
#[derive(Clone)]
pub struct Probe {
    pub log: Arc<Mutex<Vec<String>>>,
    pub barrier: Arc<Barrier>,
    pub gate: Arc<Notify>,
}

impl Probe {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            barrier: Arc::new(Barrier::new(2)),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("no log entry {}", entry))
    }
}

fn number(id: &str) -> PortDefinition {
    PortDefinition::new(id, DataType::Number)
}

/// Emits its `value` config on port `value`
struct ConstNode {
    value: Value,
}

#[async_trait]
impl Node for ConstNode {
    fn node_type(&self) -> &str {
        "test.const"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        Vec::new()
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    async fn compute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new().with_output("value", self.value.clone()))
    }
}

/// Passes a required external value through
struct SourceNode;

#[async_trait]
impl Node for SourceNode {
    fn node_type(&self) -> &str {
        "test.input"
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

/// Doubles `value`. With `delay_base_ms` set it sleeps `base - 10 * value`
/// milliseconds, so larger inputs finish first.
struct DoubleNode {
    delay_base_ms: Option<f64>,
}

#[async_trait]
impl Node for DoubleNode {
    fn node_type(&self) -> &str {
        "test.double"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![number("value").required()]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![number("result")]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_number("value")?;
        if let Some(base) = self.delay_base_ms {
            let ms = (base - value * 10.0).max(0.0) as u64;
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        Ok(NodeOutput::new().with_output("result", value * 2.0))
    }
}

/// Adds `a` and `b`
struct AddNode;

#[async_trait]
impl Node for AddNode {
    fn node_type(&self) -> &str {
        "test.add"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![number("a").required(), number("b").required()]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![number("sum")]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let sum = ctx.require_number("a")? + ctx.require_number("b")?;
        Ok(NodeOutput::new().with_output("sum", sum))
    }
}

/// Sums an array of numbers
struct SumNode;

#[async_trait]
impl Node for SumNode {
    fn node_type(&self) -> &str {
        "test.sum"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("numbers", DataType::array_of(DataType::Number)).required()]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![number("sum")]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items = ctx
            .require_input("numbers")?
            .as_array()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "numbers".to_string(),
                expected: "array".to_string(),
                actual: "scalar".to_string(),
            })?;
        let sum: f64 = items.iter().filter_map(Value::as_f64).sum();
        Ok(NodeOutput::new().with_output("sum", sum))
    }
}

/// Multiplies `value` by `factor`; `factor` defaults to 3 when left unwired
struct ScaleNode;

#[async_trait]
impl Node for ScaleNode {
    fn node_type(&self) -> &str {
        "test.scale"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![
            number("value").required(),
            number("factor").required().with_default(3.0),
        ]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![number("result")]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let result = ctx.require_number("value")? * ctx.require_number("factor")?;
        Ok(NodeOutput::new().with_output("result", result))
    }
}

/// Always fails; `panic` config makes it panic instead
struct FailNode {
    panic: bool,
}

#[async_trait]
impl Node for FailNode {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", DataType::Any)]
    }

    async fn compute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        if self.panic {
            panic!("probe exploded");
        }
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }
}

/// Records start/end in the shared log and forwards `in` to `out`.
/// Config `barrier` waits for a second probe; `gate` waits for a notify;
/// `sleep_ms` delays completion.
struct ProbeNode {
    probe: Probe,
    barrier: bool,
    gate: bool,
    sleep_ms: Option<u64>,
}

#[async_trait]
impl Node for ProbeNode {
    fn node_type(&self) -> &str {
        "test.probe"
    }

    fn input_definitions(&self, _incoming: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("in", DataType::Any)]
    }

    fn output_definitions(&self, _outgoing: &[Connection]) -> Vec<PortDefinition> {
        vec![PortDefinition::new("out", DataType::Any)]
    }

    async fn compute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.probe
            .log
            .lock()
            .unwrap()
            .push(format!("start:{}", ctx.instance));
        if self.barrier {
            self.probe.barrier.wait().await;
        }
        if self.gate {
            self.probe.gate.notified().await;
        }
        if let Some(ms) = self.sleep_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        self.probe
            .log
            .lock()
            .unwrap()
            .push(format!("end:{}", ctx.instance));
        let value = ctx.inputs.get("in").cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_output("out", value))
    }
}

struct TestFactory {
    node_type: &'static str,
    probe: Probe,
}

impl NodeFactory for TestFactory {
    fn create(&self, spec: &NodeSpec, _project: &Project) -> Result<Box<dyn Node>, NodeError> {
        let flag = |key: &str| spec.config.get(key).and_then(Value::as_bool).unwrap_or(false);
        let node: Box<dyn Node> = match self.node_type {
            "test.const" => Box::new(ConstNode {
                value: spec.config.get("value").cloned().unwrap_or(Value::Null),
            }),
            "test.input" => Box::new(SourceNode),
            "test.double" => Box::new(DoubleNode {
                delay_base_ms: spec.config.get("delay_base_ms").and_then(Value::as_f64),
            }),
            "test.add" => Box::new(AddNode),
            "test.sum" => Box::new(SumNode),
            "test.scale" => Box::new(ScaleNode),
            "test.fail" => Box::new(FailNode {
                panic: flag("panic"),
            }),
            "test.probe" => Box::new(ProbeNode {
                probe: self.probe.clone(),
                barrier: flag("barrier"),
                gate: flag("gate"),
                sleep_ms: spec
                    .config
                    .get("sleep_ms")
                    .and_then(Value::as_f64)
                    .map(|ms| ms as u64),
            }),
            other => {
                return Err(NodeError::Configuration(format!(
                    "no test node {}",
                    other
                )))
            }
        };
        Ok(node)
    }

    fn node_type(&self) -> &str {
        self.node_type
    }
}

pub fn registry(probe: &Probe) -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    for node_type in [
        "test.const",
        "test.input",
        "test.double",
        "test.add",
        "test.sum",
        "test.scale",
        "test.fail",
        "test.probe",
    ] {
        registry.register(Arc::new(TestFactory {
            node_type,
            probe: probe.clone(),
        }));
    }
    Arc::new(registry)
}

pub fn executor_with(probe: &Probe, config: RuntimeConfig) -> GraphExecutor {
    GraphExecutor::new(
        registry(probe),
        Arc::new(DisabledCodeRunner),
        Arc::new(Project::new("test")),
        Arc::new(EventBus::new(256)),
        config,
    )
}

pub fn executor(probe: &Probe) -> GraphExecutor {
    executor_with(probe, RuntimeConfig::default())
}

pub fn numbers(values: &[f64]) -> Value {
    Value::Array(values.iter().map(|v| Value::Number(*v)).collect())
}

pub fn external(entries: &[(&str, &str, Value)]) -> HashMap<rivetcore::PortRef, Value> {
    entries
        .iter()
        .map(|(node, port, value)| (rivetcore::PortRef::new(*node, *port), value.clone()))
        .collect()
}
