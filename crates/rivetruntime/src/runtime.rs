use crate::executor::{ExecutionOutcome, GraphExecutor, PreparedGraph};
use crate::registry::NodeRegistry;
use crate::status::StatusTracker;
use rivetcore::{
    CodeRunner, EventBus, ExecutionEvent, ExecutionId, ExternalInputs, FlowError, Graph,
    GraphError, GraphId, NodeInstanceId, Project, RunStatus, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs the graphs of one project with an injected code runner
pub struct ProjectRuntime {
    registry: Arc<NodeRegistry>,
    code_runner: Arc<dyn CodeRunner>,
    event_bus: Arc<EventBus>,
    project: RwLock<Arc<Project>>,
    config: RuntimeConfig,
}

impl ProjectRuntime {
    pub fn new(
        project: Project,
        registry: Arc<NodeRegistry>,
        code_runner: Arc<dyn CodeRunner>,
    ) -> Self {
        Self::with_config(project, registry, code_runner, RuntimeConfig::default())
    }

    pub fn with_config(
        project: Project,
        registry: Arc<NodeRegistry>,
        code_runner: Arc<dyn CodeRunner>,
        config: RuntimeConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            registry,
            code_runner,
            event_bus,
            project: RwLock::new(Arc::new(project)),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Snapshot of the project; executions in flight keep the snapshot they started with
    pub fn project(&self) -> Arc<Project> {
        self.project
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add or replace a graph. Running executions are unaffected.
    pub fn register_graph(&self, graph: Graph) {
        let mut guard = self.project.write().unwrap_or_else(PoisonError::into_inner);
        let mut project = (**guard).clone();
        tracing::info!("Registering graph: {} ({})", graph.name, graph.id);
        project.add_graph(graph);
        *guard = Arc::new(project);
    }

    fn executor(&self, project: Arc<Project>) -> GraphExecutor {
        GraphExecutor::new(
            self.registry.clone(),
            self.code_runner.clone(),
            project,
            self.event_bus.clone(),
            self.config.clone(),
        )
    }

    fn lookup(project: &Project, graph_id: &GraphId) -> Result<Graph, FlowError> {
        project
            .graph(graph_id)
            .cloned()
            .ok_or_else(|| FlowError::Graph(GraphError::NotFound(graph_id.clone())))
    }

    /// Instantiate and resolve a graph without running anything
    pub fn validate(&self, graph_id: &GraphId) -> Result<PreparedGraph, FlowError> {
        let project = self.project();
        let graph = Self::lookup(&project, graph_id)?;
        Ok(self.executor(project).prepare(&graph)?)
    }

    /// Execute a graph by ID and wait for the outcome
    pub async fn execute(
        &self,
        graph_id: &GraphId,
        inputs: ExternalInputs,
    ) -> Result<ExecutionOutcome, FlowError> {
        self.start(graph_id, inputs)?.join().await
    }

    /// Execute a graph with `graph.input` values and return its `graph.output` values
    pub async fn execute_graph(
        &self,
        graph_id: &GraphId,
        graph_inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, FlowError> {
        let project = self.project();
        let graph = Self::lookup(&project, graph_id)?;
        let tracker = Arc::new(StatusTracker::new(
            ExecutionId::new_v4(),
            graph_id.clone(),
            self.event_bus.clone(),
        ));
        let outcome = self
            .executor(project)
            .execute_tracked(
                &graph,
                ExternalInputs::new(),
                graph_inputs,
                tracker,
                CancellationToken::new(),
            )
            .await?;
        let outputs = outcome.graph_outputs(&graph);
        outcome.into_result()?;
        Ok(outputs)
    }

    /// Start executing a graph in the background
    pub fn start(
        &self,
        graph_id: &GraphId,
        inputs: ExternalInputs,
    ) -> Result<ExecutionHandle, FlowError> {
        let project = self.project();
        let graph = Self::lookup(&project, graph_id)?;
        let executor = self.executor(project);

        let execution_id = ExecutionId::new_v4();
        let tracker = Arc::new(StatusTracker::new(
            execution_id,
            graph_id.clone(),
            self.event_bus.clone(),
        ));
        let cancel = CancellationToken::new();

        let task = {
            let tracker = tracker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                executor
                    .execute_tracked(&graph, inputs, HashMap::new(), tracker, cancel)
                    .await
            })
        };

        Ok(ExecutionHandle {
            execution_id,
            tracker,
            cancel,
            task,
        })
    }

    /// Subscribe to events of every execution on this runtime
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Handle for monitoring and cancelling a running execution
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    tracker: Arc<StatusTracker>,
    cancel: CancellationToken,
    task: JoinHandle<Result<ExecutionOutcome, FlowError>>,
}

impl ExecutionHandle {
    /// Stop dispatching new nodes. Running nodes finish.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested for execution {}", self.execution_id);
        self.cancel.cancel();
    }

    pub fn statuses(&self) -> BTreeMap<NodeInstanceId, RunStatus> {
        self.tracker.snapshot()
    }

    pub fn status(&self, instance: &NodeInstanceId) -> Option<RunStatus> {
        self.tracker.status(instance)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tracker.subscribe()
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub async fn join(self) -> Result<ExecutionOutcome, FlowError> {
        self.task
            .await
            .map_err(|e| FlowError::Execution(format!("Execution task failed: {}", e)))?
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on node instances computing at once
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Per-instance compute timeout
    pub node_timeout_ms: Option<u64>,
    pub max_subgraph_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            node_timeout_ms: None,
            max_subgraph_depth: 8,
        }
    }
}
