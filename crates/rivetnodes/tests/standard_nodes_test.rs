use rivetcore::{
    CodeRunner, FailureKind, Graph, GraphId, NodeError, NodeInstanceId, NodeSpec, Project,
    RunState, SandboxError, Value,
};
use rivetnodes::standard_registry;
use rivetruntime::{ProjectRuntime, RuntimeConfig};
use rivetsandbox::{DisabledCodeRunner, ScriptCodeRunner};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn numbers(values: &[f64]) -> Value {
    Value::Array(values.iter().map(|v| Value::Number(*v)).collect())
}

fn runtime_with(
    graphs: Vec<Graph>,
    code_runner: Arc<dyn CodeRunner>,
    config: RuntimeConfig,
) -> ProjectRuntime {
    let mut project = Project::new("standard nodes");
    for graph in graphs {
        project.add_graph(graph);
    }
    ProjectRuntime::with_config(
        project,
        Arc::new(standard_registry()),
        code_runner,
        config,
    )
}

fn runtime(graphs: Vec<Graph>) -> ProjectRuntime {
    runtime_with(
        graphs,
        Arc::new(ScriptCodeRunner::default()),
        RuntimeConfig::default(),
    )
}

fn input(id: &str) -> NodeSpec {
    NodeSpec::with_id(id, "graph.input").with_config("id", id)
}

fn output(id: &str) -> NodeSpec {
    NodeSpec::with_id(id, "graph.output").with_config("id", id)
}

fn split_sum_graph() -> Graph {
    let mut graph = Graph::with_id("main", "Split sum");
    graph.add_node(input("numbers"));
    graph.add_node(NodeSpec::with_id("double", "math.double").split_run());
    graph.add_node(NodeSpec::with_id("sum", "math.sum"));
    graph.add_node(output("total"));
    graph.connect("numbers", "data", "double", "value");
    graph.connect("double", "result", "sum", "numbers");
    graph.connect("sum", "sum", "total", "value");
    graph
}

#[tokio::test]
async fn test_split_double_then_sum() {
    let runtime = runtime(vec![split_sum_graph()]);
    let main = GraphId::new("main");

    let outputs = runtime
        .execute_graph(
            &main,
            HashMap::from([("numbers".to_string(), numbers(&[1.0, 2.0, 3.0]))]),
        )
        .await
        .unwrap();
    assert_eq!(outputs["total"], Value::Number(12.0));

    let inputs = HashMap::from([(
        rivetcore::PortRef::new("numbers", "value"),
        numbers(&[1.0, 2.0, 3.0]),
    )]);
    let outcome = runtime.execute(&main, inputs).await.unwrap();
    assert_eq!(
        outcome.output("double", "result"),
        Some(&numbers(&[2.0, 4.0, 6.0]))
    );
    assert_eq!(
        outcome.statuses[&NodeInstanceId::split("double", 2)].state,
        RunState::Ok
    );
}

#[tokio::test]
async fn test_graph_input_without_value_is_missing() {
    let runtime = runtime(vec![split_sum_graph()]);
    let outcome = runtime
        .execute(&GraphId::new("main"), HashMap::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.failure("numbers").unwrap().kind(),
        FailureKind::MissingInput
    );
    assert_eq!(
        outcome.failure("total").unwrap().kind(),
        FailureKind::PropagatedFailure
    );
}

#[tokio::test]
async fn test_merge_grows_ports_with_wires() {
    let mut graph = Graph::with_id("main", "Merge");
    graph.add_node(input("a").with_config("default", numbers(&[1.0, 2.0])));
    graph.add_node(input("b").with_config("default", 3.0));
    graph.add_node(input("c").with_config("default", "x"));
    graph.add_node(NodeSpec::with_id("flat", "array.merge"));
    graph.add_node(NodeSpec::with_id("nested", "array.merge").with_config("flatten", false));
    graph.connect("a", "data", "flat", "input1");
    graph.connect("b", "data", "flat", "input2");
    graph.connect("c", "data", "flat", "input3");
    graph.connect("a", "data", "nested", "input1");
    graph.connect("b", "data", "nested", "input2");
    let runtime = runtime(vec![graph]);

    let prepared = runtime.validate(&GraphId::new("main")).unwrap();
    let ports: Vec<String> = prepared
        .ports(&"flat".into())
        .unwrap()
        .inputs
        .iter()
        .map(|p| p.id.clone())
        .collect();
    assert_eq!(ports, vec!["input1", "input2", "input3", "input4"]);

    let outcome = runtime
        .execute(&GraphId::new("main"), HashMap::new())
        .await
        .unwrap();
    assert_eq!(
        outcome.output("flat", "output"),
        Some(&Value::Array(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
            Value::String("x".into()),
        ]))
    );
    assert_eq!(
        outcome.output("nested", "output"),
        Some(&Value::Array(vec![numbers(&[1.0, 2.0]), Value::Number(3.0)]))
    );
}

fn code_graph(code: &str, extra: &[(&str, Value)]) -> Graph {
    let mut node = NodeSpec::with_id("code", "code")
        .with_config("code", code)
        .with_config("input_names", "a, b")
        .with_config(
            "output_names",
            Value::Array(vec![Value::String("sum".into()), Value::String("note".into())]),
        );
    for (key, value) in extra {
        node = node.with_config(*key, value.clone());
    }

    let mut graph = Graph::with_id("main", "Code");
    graph.add_node(input("a").with_config("default", 2.0));
    graph.add_node(input("b").with_config("default", 3.0));
    graph.add_node(node);
    graph.connect("a", "data", "code", "a");
    graph.connect("b", "data", "code", "b");
    graph
}

#[tokio::test]
async fn test_code_node_runs_snippet() {
    let runtime = runtime(vec![code_graph("#{ sum: inputs.a + inputs.b }", &[])]);
    let outcome = runtime
        .execute(&GraphId::new("main"), HashMap::new())
        .await
        .unwrap();

    assert!(outcome.is_success(), "{:?}", outcome.failures);
    assert_eq!(outcome.output("code", "sum"), Some(&Value::Number(5.0)));
    assert_eq!(outcome.output("code", "note"), Some(&Value::Null));
}

#[tokio::test]
async fn test_code_node_fails_when_execution_is_disabled() {
    let runtime = runtime_with(
        vec![code_graph("#{ sum: 1 }", &[])],
        Arc::new(DisabledCodeRunner),
        RuntimeConfig::default(),
    );
    let outcome = runtime
        .execute(&GraphId::new("main"), HashMap::new())
        .await
        .unwrap();

    let failure = outcome.failure("code").unwrap();
    assert_eq!(failure.kind(), FailureKind::NodeCompute);
    assert_eq!(
        failure.error,
        NodeError::Sandbox(SandboxError::DynamicExecutionDisabled)
    );
    assert_eq!(outcome.status("a").unwrap().state, RunState::Ok);
}

#[tokio::test]
async fn test_code_node_capabilities_come_from_config() {
    let graph = code_graph(
        "#{ sum: 0 }",
        &[("include_process", Value::Bool(true))],
    );
    let runtime = runtime(vec![graph]);
    let outcome = runtime
        .execute(&GraphId::new("main"), HashMap::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome.failure("code").unwrap().error,
        NodeError::Sandbox(SandboxError::CapabilityUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_subgraph_ports_follow_the_referenced_graph() {
    let mut inner = Graph::with_id("double_it", "Double it");
    inner.add_node(input("x"));
    inner.add_node(NodeSpec::with_id("double", "math.double"));
    inner.add_node(output("y"));
    inner.connect("x", "data", "double", "value");
    inner.connect("double", "result", "y", "value");

    let mut outer = Graph::with_id("main", "Outer");
    outer.add_node(input("n").with_config("default", 4.0));
    outer.add_node(NodeSpec::with_id("call", "graph.subgraph").with_config("graph_id", "double_it"));
    outer.add_node(output("result"));
    outer.connect("n", "data", "call", "x");
    outer.connect("call", "y", "result", "value");

    let runtime = runtime(vec![outer, inner]);
    let outputs = runtime
        .execute_graph(&GraphId::new("main"), HashMap::new())
        .await
        .unwrap();
    assert_eq!(outputs["result"], Value::Number(8.0));
}

#[tokio::test]
async fn test_recursive_subgraph_hits_depth_limit() {
    let mut looping = Graph::with_id("loop", "Loop");
    looping.add_node(NodeSpec::with_id("call", "graph.subgraph").with_config("graph_id", "loop"));

    let config = RuntimeConfig {
        max_subgraph_depth: 3,
        ..RuntimeConfig::default()
    };
    let runtime = runtime_with(vec![looping], Arc::new(DisabledCodeRunner), config);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        runtime.execute(&GraphId::new("loop"), HashMap::new()),
    )
    .await
    .expect("recursion was not bounded")
    .unwrap();

    let failure = outcome.failure("call").unwrap();
    assert_eq!(failure.kind(), FailureKind::NodeCompute);
    assert!(failure.error.to_string().contains("depth limit"));
}

#[tokio::test]
async fn test_missing_subgraph_is_a_creation_error() {
    let mut graph = Graph::with_id("main", "Broken");
    graph.add_node(NodeSpec::with_id("call", "graph.subgraph").with_config("graph_id", "nope"));
    let runtime = runtime(vec![graph]);

    assert!(matches!(
        runtime.validate(&GraphId::new("main")),
        Err(rivetcore::FlowError::Graph(
            rivetcore::GraphError::NodeCreation { .. }
        ))
    ));
}

#[tokio::test]
async fn test_delay_stops_when_cancelled() {
    let mut graph = Graph::with_id("main", "Slow");
    graph.add_node(NodeSpec::with_id("wait", "time.delay").with_config("delay_ms", 10_000.0));
    graph.add_node(NodeSpec::with_id("log", "debug.log"));
    graph.connect("wait", "value", "log", "value");
    let runtime = runtime(vec![graph]);

    let handle = runtime.start(&GraphId::new("main"), HashMap::new()).unwrap();
    let wait = NodeInstanceId::node("wait");
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.status(&wait).map(|s| s.state) != Some(RunState::Running) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    handle.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.failure("wait").unwrap().kind(), FailureKind::Cancelled);
    // Descendants of a failed node are settled as propagated failures
    assert_eq!(
        outcome.failure("log").unwrap().kind(),
        FailureKind::PropagatedFailure
    );
}

#[test]
fn test_registry_lists_every_standard_node() {
    let registry = standard_registry();
    assert_eq!(
        registry.list_node_types(),
        vec![
            "array.merge",
            "code",
            "debug.log",
            "graph.input",
            "graph.output",
            "graph.subgraph",
            "math.double",
            "math.sum",
            "time.delay",
        ]
    );
}
