use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rivetcore::{
    ExecutionEvent, ExternalInputs, Graph, GraphId, NodeEvent, NodeSpec, PortRef, Project,
    RunState, Value, GRAPH_INPUT_TYPE,
};
use rivetruntime::{NodeRegistry, ProjectRuntime, RuntimeConfig};
use rivetsandbox::{SandboxConfig, SandboxKind};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rivet")]
#[command(about = "Rivet graph engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph of a project file
    Run {
        /// Path to project JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Graph to run; defaults to the project's main graph
        #[arg(short, long)]
        graph: Option<String>,

        /// Graph inputs as a JSON object keyed by graph.input id
        #[arg(short, long)]
        input: Option<String>,

        /// Value for an unwired input port, as node.port=JSON (repeatable)
        #[arg(short, long = "port")]
        ports: Vec<String>,

        /// Code execution backend
        #[arg(long, value_enum, default_value = "script")]
        sandbox: SandboxArg,

        /// JSON file with "runtime" and "sandbox" sections
        #[arg(long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Instantiate and resolve a graph without executing it
    Validate {
        /// Path to project JSON file
        file: PathBuf,

        #[arg(short, long)]
        graph: Option<String>,
    },

    /// List available node types
    Nodes,

    /// Create an example project
    Init {
        /// Output file path
        #[arg(short, long, default_value = "project.json")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SandboxArg {
    Script,
    Host,
    Disabled,
}

impl From<SandboxArg> for SandboxKind {
    fn from(arg: SandboxArg) -> Self {
        match arg {
            SandboxArg::Script => SandboxKind::Script,
            SandboxArg::Host => SandboxKind::Host,
            SandboxArg::Disabled => SandboxKind::Disabled,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    runtime: RuntimeConfig,
    sandbox: SandboxConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            graph,
            input,
            ports,
            sandbox,
            config,
            verbose,
        } => {
            init_logging(if verbose { "debug" } else { "info" });
            let config = load_config(config.as_deref())?;
            run_graph(file, graph, input, ports, sandbox.into(), config).await?;
        }

        Commands::Validate { file, graph } => {
            init_logging("warn");
            validate_graph(file, graph)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_project(output)?;
        }
    }

    Ok(())
}

/// `RUST_LOG` overrides the default level
fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn load_project(file: &Path) -> Result<Project> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading project {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing project {}", file.display()))
}

fn select_graph<'a>(project: &'a Project, graph: Option<&str>) -> Result<&'a Graph> {
    match graph {
        Some(id) => project
            .graph(&GraphId::new(id))
            .ok_or_else(|| anyhow!("Graph not found: {}", id)),
        None => project
            .main_graph()
            .ok_or_else(|| anyhow!("Project has no main graph; pass --graph")),
    }
}

fn registry() -> Arc<NodeRegistry> {
    Arc::new(rivetnodes::standard_registry())
}

/// Route `--input` entries to the `value` port of the matching graph.input nodes
/// and parse `--port node.port=JSON` entries
fn external_inputs(graph: &Graph, input: Option<String>, ports: Vec<String>) -> Result<ExternalInputs> {
    let mut inputs = ExternalInputs::new();

    if let Some(input) = input {
        let json: serde_json::Value = serde_json::from_str(&input)?;
        let serde_json::Value::Object(entries) = json else {
            return Err(anyhow!("Input must be a JSON object"));
        };
        for (id, value) in entries {
            let targets: Vec<&NodeSpec> = graph
                .nodes
                .iter()
                .filter(|n| {
                    n.node_type == GRAPH_INPUT_TYPE
                        && n.config_str("id").unwrap_or(n.id.as_str()) == id
                })
                .collect();
            if targets.is_empty() {
                return Err(anyhow!("Graph {} has no graph.input '{}'", graph.id, id));
            }
            for node in targets {
                inputs.insert(
                    PortRef::new(node.id.clone(), "value"),
                    Value::from_plain_json(value.clone()),
                );
            }
        }
    }

    for entry in ports {
        let (port, json) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected node.port=JSON, got '{}'", entry))?;
        let (node, port) = port
            .split_once('.')
            .ok_or_else(|| anyhow!("Expected node.port=JSON, got '{}'", entry))?;
        let value: serde_json::Value = serde_json::from_str(json)
            .with_context(|| format!("parsing value for {}.{}", node, port))?;
        inputs.insert(PortRef::new(node, port), Value::from_plain_json(value));
    }

    Ok(inputs)
}

async fn run_graph(
    file: PathBuf,
    graph: Option<String>,
    input: Option<String>,
    ports: Vec<String>,
    sandbox: SandboxKind,
    config: CliConfig,
) -> Result<()> {
    println!("🚀 Loading project from: {}", file.display());

    let project = load_project(&file)?;
    let selected = select_graph(&project, graph.as_deref())?.clone();

    println!("📋 Graph: {} ({})", selected.name, selected.id);
    println!("   Nodes: {}", selected.nodes.len());
    println!("   Connections: {}", selected.connections.len());
    println!("   Sandbox: {:?}", sandbox);
    println!();

    let inputs = external_inputs(&selected, input, ports)?;

    let runtime = ProjectRuntime::with_config(
        project,
        registry(),
        sandbox.build(config.sandbox),
        config.runtime,
    );

    // Subscribe before starting so no event is missed
    let mut events = runtime.subscribe_events();
    let handle = runtime.start(&selected.id, inputs)?;
    let execution_id = handle.execution_id;

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.execution_id() != execution_id {
                continue;
            }
            match event {
                ExecutionEvent::GraphStarted { .. } => {
                    println!("▶️  Graph started");
                }
                ExecutionEvent::StatusChanged {
                    instance, to, error, ..
                } => match to {
                    RunState::Running => println!("  ⚡ Starting {}", instance),
                    RunState::Ok => println!("  ✅ {} completed", instance),
                    RunState::Error => {
                        let reason = error.map(|e| e.message).unwrap_or_default();
                        println!("  ❌ {} failed: {}", instance, reason);
                    }
                    RunState::Idle => {}
                },
                ExecutionEvent::NodeEvent {
                    instance, event, ..
                } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", instance, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", instance, message);
                    }
                    NodeEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", instance, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", instance, percent);
                        }
                    }
                },
                ExecutionEvent::GraphCompleted {
                    success,
                    cancelled,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Graph completed successfully in {}ms", duration_ms);
                    } else if cancelled {
                        println!("🛑 Graph cancelled after {}ms", duration_ms);
                    } else {
                        println!("💥 Graph failed after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let outcome = handle.join().await?;
    if tokio::time::timeout(Duration::from_secs(1), event_task)
        .await
        .is_err()
    {
        tracing::warn!("Event listener did not finish");
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", outcome.execution_id);
    let ok = outcome
        .statuses
        .iter()
        .filter(|(id, s)| !id.is_split_instance() && s.state == RunState::Ok)
        .count();
    println!("   Completed: {}/{} nodes", ok, selected.nodes.len());

    if !outcome.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (node_id, outputs) in &outcome.outputs {
            if outputs.is_empty() {
                continue;
            }
            println!("   Node {}:", node_id);
            let mut ports: Vec<_> = outputs.iter().collect();
            ports.sort_by(|a, b| a.0.cmp(b.0));
            for (port, value) in ports {
                println!("     {}: {}", port, value.to_plain_json());
            }
        }
    }

    let graph_outputs = outcome.graph_outputs(&selected);
    if !graph_outputs.is_empty() {
        println!();
        println!("🎯 Graph outputs:");
        let mut entries: Vec<_> = graph_outputs.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (id, value) in entries {
            println!("   {}: {}", id, value.to_plain_json());
        }
    }

    outcome.into_result()?;
    Ok(())
}

fn validate_graph(file: PathBuf, graph: Option<String>) -> Result<()> {
    println!("🔍 Validating project: {}", file.display());

    let project = load_project(&file)?;
    let graph_id = select_graph(&project, graph.as_deref())?.id.clone();
    let runtime = ProjectRuntime::new(
        project,
        registry(),
        SandboxKind::Disabled.build(SandboxConfig::default()),
    );

    let prepared = runtime.validate(&graph_id)?;
    let project = runtime.project();
    let selected = select_graph(&project, Some(graph_id.as_str()))?;

    println!("✅ Graph is valid:");
    println!("   Name: {}", selected.name);
    println!("   Nodes: {}", selected.nodes.len());
    println!("   Connections: {}", selected.connections.len());
    println!("   Execution order:");
    for node_id in prepared.plan().order() {
        let Some(spec) = selected.find_node(node_id) else {
            continue;
        };
        let split = if spec.is_split_run { " [split]" } else { "" };
        match prepared.ports(node_id) {
            Some(ports) => println!(
                "     {} ({}){} - {} in, {} out",
                node_id,
                spec.node_type,
                split,
                ports.inputs.len(),
                ports.outputs.len()
            ),
            None => println!("     {} ({}){}", node_id, spec.node_type, split),
        }
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_project(output: PathBuf) -> Result<()> {
    let mut graph = Graph::with_id("main", "Double and sum");
    graph.description = Some("Doubles every number in parallel, then adds them up".to_string());

    let input = graph.add_node(
        NodeSpec::with_id("numbers", GRAPH_INPUT_TYPE)
            .with_title("Numbers")
            .with_config("id", "numbers")
            .with_config(
                "default",
                Value::Array(vec![1.0.into(), 2.0.into(), 3.0.into()]),
            )
            .with_position(100.0, 100.0),
    );
    let double = graph.add_node(
        NodeSpec::with_id("double", "math.double")
            .with_title("Double")
            .split_run()
            .with_position(300.0, 100.0),
    );
    let sum = graph.add_node(
        NodeSpec::with_id("sum", "math.sum")
            .with_title("Sum")
            .with_position(500.0, 100.0),
    );
    let total = graph.add_node(
        NodeSpec::with_id("total", "graph.output")
            .with_title("Total")
            .with_config("id", "total")
            .with_position(700.0, 100.0),
    );

    graph.connect(input, "data", double.clone(), "value");
    graph.connect(double, "result", sum.clone(), "numbers");
    graph.connect(sum, "sum", total, "value");

    let mut project = Project::new("Example project");
    project.add_graph(graph);

    let json = serde_json::to_string_pretty(&project)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example project: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  rivet run --file {} --input '{{\"numbers\": [4, 5, 6]}}'",
        output.display()
    );

    Ok(())
}
