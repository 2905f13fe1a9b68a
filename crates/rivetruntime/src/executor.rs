use crate::registry::NodeRegistry;
use crate::resolver::{self, DependencyPlan};
use crate::runtime::RuntimeConfig;
use crate::split::{self, SplitPlan};
use crate::status::StatusTracker;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use rivetcore::{
    CodeRunner, Connection, EventBus, ExecutionEvent, ExecutionId, ExternalInputs, FlowError,
    Graph, GraphError, GraphId, GraphInvoker, Node, NodeContext, NodeError, NodeFailure, NodeId,
    NodeInstanceId, NodePorts, NodeSpec, PortRef, Project, RunStatus, StatusError, Value,
    GRAPH_OUTPUT_TYPE,
};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Executes graphs as DAGs, running independent nodes concurrently
#[derive(Clone)]
pub struct GraphExecutor {
    registry: Arc<NodeRegistry>,
    code_runner: Arc<dyn CodeRunner>,
    project: Arc<Project>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
    permits: Arc<Semaphore>,
    depth: usize,
}

/// A graph with its nodes instantiated, port sets computed and dependencies resolved
pub struct PreparedGraph {
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    ports: HashMap<NodeId, NodePorts>,
    incoming: HashMap<NodeId, Vec<Connection>>,
    plan: DependencyPlan,
}

impl PreparedGraph {
    pub fn plan(&self) -> &DependencyPlan {
        &self.plan
    }

    pub fn ports(&self, node: &NodeId) -> Option<&NodePorts> {
        self.ports.get(node)
    }
}

impl GraphExecutor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        code_runner: Arc<dyn CodeRunner>,
        project: Arc<Project>,
        event_bus: Arc<EventBus>,
        config: RuntimeConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallel_nodes.max(1)));
        Self {
            registry,
            code_runner,
            project,
            event_bus,
            config,
            permits,
            depth: 0,
        }
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Instantiate every node, compute its ports against the current
    /// connections and resolve dependencies. Structural errors surface here.
    pub fn prepare(&self, graph: &Graph) -> Result<PreparedGraph, GraphError> {
        let mut nodes = HashMap::new();
        let mut ports = HashMap::new();
        let mut incoming_map = HashMap::new();

        for spec in &graph.nodes {
            let node = self.registry.create_node(spec, &self.project)?;
            let incoming = graph.incoming(&spec.id);
            let outgoing = graph.outgoing(&spec.id);
            ports.insert(
                spec.id.clone(),
                NodePorts {
                    inputs: node.input_definitions(&incoming),
                    outputs: node.output_definitions(&outgoing),
                },
            );
            incoming_map.insert(spec.id.clone(), incoming);
            nodes.insert(spec.id.clone(), node);
        }

        let plan = resolver::resolve(graph, &ports)?;
        Ok(PreparedGraph {
            nodes,
            ports,
            incoming: incoming_map,
            plan,
        })
    }

    /// Execute a graph with a fresh tracker and no cancellation
    pub async fn execute(
        &self,
        graph: &Graph,
        inputs: ExternalInputs,
    ) -> Result<ExecutionOutcome, FlowError> {
        let tracker = Arc::new(StatusTracker::new(
            ExecutionId::new_v4(),
            graph.id.clone(),
            self.event_bus.clone(),
        ));
        self.execute_tracked(
            graph,
            inputs,
            HashMap::new(),
            tracker,
            CancellationToken::new(),
        )
        .await
    }

    /// Execute a graph, writing status into `tracker`.
    ///
    /// Structural errors are returned before any node is dispatched. Node
    /// failures never abort the call; they are collected in the outcome.
    pub async fn execute_tracked(
        &self,
        graph: &Graph,
        inputs: ExternalInputs,
        graph_inputs: HashMap<String, Value>,
        tracker: Arc<StatusTracker>,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, FlowError> {
        let execution_id = tracker.execution_id();
        let start_time = Instant::now();

        let prepared = self.prepare(graph).map_err(|e| {
            tracing::error!("Graph {} rejected: {}", graph.id, e);
            e
        })?;
        tracker.begin_graph(graph);
        self.warn_unused_inputs(&prepared, &inputs);

        self.event_bus.emit(ExecutionEvent::GraphStarted {
            execution_id,
            graph_id: graph.id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Starting graph execution: {} ({} nodes, execution {})",
            graph.id,
            prepared.plan.len(),
            execution_id
        );

        let graph_inputs = Arc::new(graph_inputs);
        let specs: HashMap<&NodeId, &NodeSpec> = graph.nodes.iter().map(|n| (&n.id, n)).collect();
        let mut outputs: BTreeMap<NodeId, HashMap<String, Value>> = BTreeMap::new();
        // true = ok, false = error
        let mut settled: HashMap<NodeId, bool> = HashMap::new();
        let mut dispatched: HashSet<NodeId> = HashSet::new();
        let mut failures: Vec<NodeFailure> = Vec::new();
        let mut running = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                tracing::warn!(
                    "Execution {} cancelled; waiting for {} running node(s)",
                    execution_id,
                    running.len()
                );
            }
            if !cancelled {
                for node_id in prepared.plan.order() {
                    if dispatched.contains(node_id) || settled.contains_key(node_id) {
                        continue;
                    }
                    let ready = prepared
                        .plan
                        .predecessors(node_id)
                        .map_or(true, |preds| preds.iter().all(|p| settled.get(p) == Some(&true)));
                    if !ready {
                        continue;
                    }

                    let (Some(spec), Some(node), Some(ports)) = (
                        specs.get(node_id),
                        prepared.nodes.get(node_id),
                        prepared.ports.get(node_id),
                    ) else {
                        return Err(FlowError::Execution(format!(
                            "Node {} missing from prepared graph",
                            node_id
                        )));
                    };

                    dispatched.insert(node_id.clone());
                    tracing::debug!("Dispatching node {} ({})", node_id, spec.node_type);

                    let incoming = prepared
                        .incoming
                        .get(node_id)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    let node_inputs =
                        match collect_inputs(node_id, ports, incoming, &outputs, &inputs) {
                            Ok(node_inputs) => node_inputs,
                            Err(e) => {
                                tracker.start(&NodeInstanceId::node(node_id.clone()))?;
                                settle_failure(
                                    &prepared.plan,
                                    &tracker,
                                    &mut settled,
                                    &mut failures,
                                    node_id,
                                    e,
                                )?;
                                continue;
                            }
                        };

                    let job = NodeJob {
                        node: node.clone(),
                        spec: (*spec).clone(),
                        ports: ports.clone(),
                        inputs: node_inputs,
                        execution_id,
                        tracker: tracker.clone(),
                        event_bus: self.event_bus.clone(),
                        code_runner: self.code_runner.clone(),
                        graphs: Arc::new(self.clone()),
                        graph_inputs: graph_inputs.clone(),
                        cancel: cancel.child_token(),
                        permits: self.permits.clone(),
                        timeout: self.config.node_timeout_ms.map(Duration::from_millis),
                    };
                    running.push(tokio::spawn(job.run()));
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                // Wakes the loop; the flag is set at the top
                _ = cancel.cancelled(), if !cancelled => {}
                Some(joined) = running.next() => {
                    let (node_id, result) = joined
                        .map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))?;

                    match result {
                        None => {
                            tracing::debug!("Node {} never started before cancellation", node_id);
                        }
                        Some(Ok(node_outputs)) => {
                            tracker.succeed(&NodeInstanceId::node(node_id.clone()))?;
                            tracing::debug!("Node {} completed", node_id);
                            outputs.insert(node_id.clone(), node_outputs);
                            settled.insert(node_id, true);
                        }
                        Some(Err(e)) => {
                            settle_failure(
                                &prepared.plan,
                                &tracker,
                                &mut settled,
                                &mut failures,
                                &node_id,
                                e,
                            )?;
                        }
                    }
                }
                else => break,
            }
        }

        failures.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        let duration_ms = start_time.elapsed().as_millis() as u64;
        let outcome = ExecutionOutcome {
            execution_id,
            graph_id: graph.id.clone(),
            outputs,
            statuses: tracker.snapshot(),
            failures,
            cancelled,
            duration_ms,
        };

        tracing::info!(
            "Graph {} finished in {}ms: {} ok, {} failed{}",
            graph.id,
            duration_ms,
            outcome.outputs.len(),
            outcome.failures.len(),
            if cancelled { " (cancelled)" } else { "" }
        );
        self.event_bus.emit(ExecutionEvent::GraphCompleted {
            execution_id,
            graph_id: graph.id.clone(),
            success: outcome.is_success(),
            cancelled,
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(outcome)
    }

    fn warn_unused_inputs(&self, prepared: &PreparedGraph, inputs: &ExternalInputs) {
        for port in inputs.keys() {
            let declared = prepared
                .ports
                .get(&port.node_id)
                .and_then(|p| p.input(&port.port_id))
                .is_some();
            let wired = prepared
                .incoming
                .get(&port.node_id)
                .map_or(false, |conns| conns.iter().any(|c| c.input_id == port.port_id));
            if !declared || wired {
                tracing::warn!("Ignoring external input for {}", port);
            }
        }
    }

    fn nested(&self) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(self.config.max_parallel_nodes.max(1))),
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}

#[async_trait]
impl GraphInvoker for GraphExecutor {
    async fn invoke_graph(
        &self,
        graph_id: &GraphId,
        inputs: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<HashMap<String, Value>, NodeError> {
        if self.depth >= self.config.max_subgraph_depth {
            return Err(NodeError::ExecutionFailed(format!(
                "Subgraph depth limit of {} reached invoking {}",
                self.config.max_subgraph_depth, graph_id
            )));
        }
        let graph = self
            .project
            .graph(graph_id)
            .ok_or_else(|| NodeError::Configuration(format!("Graph not found: {}", graph_id)))?;

        let child = self.nested();
        let tracker = Arc::new(StatusTracker::new(
            ExecutionId::new_v4(),
            graph_id.clone(),
            self.event_bus.clone(),
        ));
        tracing::debug!("Invoking subgraph {} at depth {}", graph_id, child.depth);

        let outcome = child
            .execute_tracked(
                graph,
                ExternalInputs::new(),
                inputs,
                tracker,
                cancellation,
            )
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Subgraph {}: {}", graph_id, e)))?;

        if !outcome.is_success() {
            let reason = match outcome.failures.first() {
                Some(failure) => failure.to_string(),
                None => "cancelled".to_string(),
            };
            return Err(NodeError::ExecutionFailed(format!(
                "Subgraph {} failed: {}",
                graph_id, reason
            )));
        }
        Ok(outcome.graph_outputs(graph))
    }
}

/// Resolve the input values of one node
fn collect_inputs(
    node_id: &NodeId,
    ports: &NodePorts,
    incoming: &[Connection],
    outputs: &BTreeMap<NodeId, HashMap<String, Value>>,
    external: &ExternalInputs,
) -> Result<HashMap<String, Value>, NodeError> {
    let mut inputs = HashMap::new();

    for def in &ports.inputs {
        let value = match incoming.iter().find(|c| c.input_id == def.id) {
            Some(conn) => outputs
                .get(&conn.output_node_id)
                .and_then(|o| o.get(&conn.output_id))
                .cloned(),
            None => external
                .get(&PortRef::new(node_id.clone(), def.id.clone()))
                .cloned(),
        };

        match value.or_else(|| def.default.clone()) {
            Some(value) => {
                inputs.insert(def.id.clone(), value);
            }
            None if def.required => {
                return Err(NodeError::MissingInput {
                    port: def.id.clone(),
                })
            }
            None => {}
        }
    }

    Ok(inputs)
}

/// Record a failed node and mark every not-yet-settled descendant as a
/// propagated failure
fn settle_failure(
    plan: &DependencyPlan,
    tracker: &StatusTracker,
    settled: &mut HashMap<NodeId, bool>,
    failures: &mut Vec<NodeFailure>,
    node_id: &NodeId,
    error: NodeError,
) -> Result<(), StatusError> {
    tracing::error!("Node {} failed: {}", node_id, error);
    tracker.fail(&NodeInstanceId::node(node_id.clone()), &error)?;
    settled.insert(node_id.clone(), false);
    failures.push(NodeFailure::new(node_id.clone(), error));

    for descendant in plan.descendants(node_id) {
        if settled.contains_key(&descendant) {
            continue;
        }
        let propagated = NodeError::PropagatedFailure {
            origin: node_id.clone(),
        };
        tracker.fail(&NodeInstanceId::node(descendant.clone()), &propagated)?;
        settled.insert(descendant.clone(), false);
        failures.push(NodeFailure::new(descendant, propagated));
    }
    Ok(())
}

/// Everything one dispatched node needs, owned so it can move onto a task
struct NodeJob {
    node: Arc<dyn Node>,
    spec: NodeSpec,
    ports: NodePorts,
    inputs: HashMap<String, Value>,
    execution_id: ExecutionId,
    tracker: Arc<StatusTracker>,
    event_bus: Arc<EventBus>,
    code_runner: Arc<dyn CodeRunner>,
    graphs: Arc<dyn GraphInvoker>,
    graph_inputs: Arc<HashMap<String, Value>>,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

type NodeResult = Result<HashMap<String, Value>, NodeError>;

impl NodeJob {
    /// `None` when cancellation arrived before the node got a worker; the
    /// node is then left idle.
    async fn run(self) -> (NodeId, Option<NodeResult>) {
        let node_id = self.spec.id.clone();
        let job = Arc::new(self);
        let result = job.run_node().await;
        (node_id, result)
    }

    async fn run_node(self: Arc<Self>) -> Option<NodeResult> {
        let aggregate = NodeInstanceId::node(self.spec.id.clone());
        let plan = if self.spec.is_split_run {
            split::plan_split(&self.inputs, &self.ports.inputs, self.spec.split_run_max)
        } else {
            Ok(SplitPlan::Single)
        };

        match plan {
            Ok(SplitPlan::Single) => {
                let _permit = self.acquire().await?;
                if let Err(e) = self.tracker.start(&aggregate) {
                    return Some(Err(tracker_failure(e)));
                }
                Some(self.compute(aggregate, self.inputs.clone()).await)
            }
            // The aggregate holds no worker itself; its instances queue for one each
            Ok(SplitPlan::Instances(sets)) => {
                if let Err(e) = self.tracker.start(&aggregate) {
                    return Some(Err(tracker_failure(e)));
                }
                Some(self.run_instances(sets).await)
            }
            Err(e) => {
                if let Err(e) = self.tracker.start(&aggregate) {
                    return Some(Err(tracker_failure(e)));
                }
                Some(Err(e))
            }
        }
    }

    /// Wait for a worker permit unless the execution is cancelled first
    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        }
    }

    /// Fan out, then fan the results back in by index
    async fn run_instances(self: Arc<Self>, sets: Vec<HashMap<String, Value>>) -> NodeResult {
        let count = sets.len();
        self.tracker.add_split_instances(&self.spec.id, count);
        tracing::debug!("Node {} split into {} instance(s)", self.spec.id, count);

        let mut results: Vec<Option<NodeResult>> = (0..count).map(|_| None).collect();
        if self.spec.split_sequential {
            for (index, inputs) in sets.into_iter().enumerate() {
                results[index] = self.clone().run_instance(index, count, inputs).await;
                if results[index].is_none() {
                    break;
                }
            }
        } else {
            let mut instances = JoinSet::new();
            for (index, inputs) in sets.into_iter().enumerate() {
                let job = self.clone();
                instances.spawn(async move {
                    let result = job.run_instance(index, count, inputs).await;
                    (index, result)
                });
            }
            while let Some(joined) = instances.join_next().await {
                let (index, result) = joined.map_err(|e| {
                    NodeError::ExecutionFailed(format!("Split instance task failed: {}", e))
                })?;
                results[index] = result;
            }
        }

        let mut collected = Vec::with_capacity(count);
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Some(Ok(outputs)) => collected.push(outputs),
                Some(Err(e)) => return Err(e),
                None if self.cancel.is_cancelled() => {
                    tracing::warn!(
                        "Node {} cancelled after {} of {} instance(s)",
                        self.spec.id,
                        index,
                        count
                    );
                    return Err(NodeError::Cancelled);
                }
                None => {
                    return Err(NodeError::ExecutionFailed(format!(
                        "Split instance {} never completed",
                        index
                    )))
                }
            }
        }
        Ok(split::merge_instance_outputs(&self.ports.outputs, collected))
    }

    /// `None` when the instance was never started
    async fn run_instance(
        self: Arc<Self>,
        index: usize,
        count: usize,
        inputs: HashMap<String, Value>,
    ) -> Option<NodeResult> {
        let _permit = self.acquire().await?;
        let instance = NodeInstanceId::split(self.spec.id.clone(), index);
        if let Err(e) = self.tracker.start(&instance) {
            return Some(Err(tracker_failure(e)));
        }

        let result = self.compute(instance.clone(), inputs).await;
        let tracked = match &result {
            Ok(_) => self.tracker.succeed(&instance),
            Err(e) => self.tracker.fail(&instance, e),
        };
        if let Err(e) = tracked {
            return Some(Err(tracker_failure(e)));
        }

        let done = self.tracker.completed_instances(&self.spec.id);
        self.event_bus
            .create_emitter(self.execution_id, NodeInstanceId::node(self.spec.id.clone()))
            .progress(
                done as f64 * 100.0 / count as f64,
                Some(format!("{}/{} instances", done, count)),
            );
        Some(result)
    }

    /// Run the node's compute for one instance. The caller holds the worker permit.
    async fn compute(&self, instance: NodeInstanceId, inputs: HashMap<String, Value>) -> NodeResult {
        let ctx = NodeContext {
            node_id: self.spec.id.clone(),
            instance: instance.clone(),
            inputs,
            config: self.spec.config.clone(),
            graph_inputs: self.graph_inputs.clone(),
            events: self.event_bus.create_emitter(self.execution_id, instance.clone()),
            cancellation: self.cancel.clone(),
            code_runner: self.code_runner.clone(),
            graphs: self.graphs.clone(),
        };

        let start = Instant::now();
        let guarded = AssertUnwindSafe(self.node.compute(ctx)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(NodeError::Timeout {
                        ms: limit.as_millis() as u64,
                    })
                }
            },
            None => guarded.await,
        };
        let output = outcome.map_err(|panic| {
            NodeError::ExecutionFailed(format!("Node panicked: {}", panic_message(&*panic)))
        })??;

        tracing::debug!(
            "{} ({}) computed in {}ms",
            instance,
            self.spec.node_type,
            start.elapsed().as_millis()
        );
        Ok(output.outputs)
    }
}

fn tracker_failure(e: StatusError) -> NodeError {
    tracing::error!("Status tracker rejected update: {}", e);
    NodeError::ExecutionFailed(e.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Complete per-node result of one execution pass
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub execution_id: ExecutionId,
    pub graph_id: GraphId,
    /// Outputs of every node that reached `ok`
    pub outputs: BTreeMap<NodeId, HashMap<String, Value>>,
    pub statuses: BTreeMap<NodeInstanceId, RunStatus>,
    /// Every failed node, sorted by node id
    pub failures: Vec<NodeFailure>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn output(&self, node: impl Into<NodeId>, port: &str) -> Option<&Value> {
        self.outputs.get(&node.into()).and_then(|o| o.get(port))
    }

    /// Aggregate status of a node
    pub fn status(&self, node: impl Into<NodeId>) -> Option<&RunStatus> {
        self.statuses.get(&NodeInstanceId::node(node))
    }

    pub fn failure(&self, node: impl Into<NodeId>) -> Option<&NodeFailure> {
        let node = node.into();
        self.failures.iter().find(|f| f.node_id == node)
    }

    /// Values published by the graph's `graph.output` nodes, keyed by their `id` config
    pub fn graph_outputs(&self, graph: &Graph) -> HashMap<String, Value> {
        graph
            .nodes
            .iter()
            .filter(|n| n.node_type == GRAPH_OUTPUT_TYPE)
            .filter_map(|n| {
                let value = self.outputs.get(&n.id)?.get("value")?.clone();
                let key = n.config_str("id").unwrap_or(n.id.as_str()).to_string();
                Some((key, value))
            })
            .collect()
    }

    pub fn into_result(self) -> Result<BTreeMap<NodeId, HashMap<String, Value>>, FlowError> {
        if !self.failures.is_empty() {
            return Err(FlowError::NodesFailed {
                failures: self.failures,
            });
        }
        if self.cancelled {
            return Err(FlowError::Execution(format!(
                "Execution {} was cancelled",
                self.execution_id
            )));
        }
        Ok(self.outputs)
    }
}
