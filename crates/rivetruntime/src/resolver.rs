//! Dependency resolution: from a graph and its live port sets to a
//! deterministic partial order of nodes.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use rivetcore::{Graph, GraphError, NodeId, NodePorts, NodeSpec};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Result of resolving a graph: who waits on whom, and one stable
/// topological order (ties broken by node id)
#[derive(Debug, Clone)]
pub struct DependencyPlan {
    dag: DiGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
    order: Vec<NodeId>,
    predecessors: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl DependencyPlan {
    /// Topological order; ties broken by ascending node id
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn predecessors(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.predecessors.get(node)
    }

    /// Nodes with no predecessors, eligible as soon as execution starts
    pub fn roots(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| self.predecessors.get(*id).map_or(true, BTreeSet::is_empty))
            .cloned()
            .collect()
    }

    /// Every node reachable from `node`, excluding itself, sorted by id
    pub fn descendants(&self, node: &NodeId) -> Vec<NodeId> {
        let Some(&start) = self.indices.get(node) else {
            return Vec::new();
        };
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(&self.dag, start);
        while let Some(idx) = dfs.next(&self.dag) {
            if idx != start {
                found.insert(self.dag[idx].clone());
            }
        }
        found.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Resolve `graph` against the port sets computed for its nodes.
///
/// Pure and repeatable: the same graph and ports always give the same plan.
pub fn resolve(
    graph: &Graph,
    ports: &HashMap<NodeId, NodePorts>,
) -> Result<DependencyPlan, GraphError> {
    let mut table: BTreeMap<&NodeId, &NodeSpec> = BTreeMap::new();
    for node in &graph.nodes {
        if table.insert(&node.id, node).is_some() {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }

    let mut dag = DiGraph::new();
    let mut indices = HashMap::new();
    for id in table.keys() {
        indices.insert((*id).clone(), dag.add_node((*id).clone()));
    }

    let mut predecessors: BTreeMap<NodeId, BTreeSet<NodeId>> = table
        .keys()
        .map(|id| ((*id).clone(), BTreeSet::new()))
        .collect();
    let mut wired_inputs: HashSet<(&NodeId, &str)> = HashSet::new();

    for conn in &graph.connections {
        let malformed = |reason: String| GraphError::MalformedGraph {
            connection: conn.to_string(),
            reason,
        };

        let from = *indices.get(&conn.output_node_id).ok_or_else(|| {
            malformed(format!("output node {} does not exist", conn.output_node_id))
        })?;
        let to = *indices.get(&conn.input_node_id).ok_or_else(|| {
            malformed(format!("input node {} does not exist", conn.input_node_id))
        })?;

        if ports
            .get(&conn.output_node_id)
            .and_then(|p| p.output(&conn.output_id))
            .is_none()
        {
            return Err(malformed(format!(
                "node {} has no output port '{}'",
                conn.output_node_id, conn.output_id
            )));
        }
        if ports
            .get(&conn.input_node_id)
            .and_then(|p| p.input(&conn.input_id))
            .is_none()
        {
            return Err(malformed(format!(
                "node {} has no input port '{}'",
                conn.input_node_id, conn.input_id
            )));
        }
        if !wired_inputs.insert((&conn.input_node_id, conn.input_id.as_str())) {
            return Err(malformed(format!(
                "input port {}.{} already has an incoming connection",
                conn.input_node_id, conn.input_id
            )));
        }

        dag.update_edge(from, to, ());
        if let Some(preds) = predecessors.get_mut(&conn.input_node_id) {
            preds.insert(conn.output_node_id.clone());
        }
    }

    let order = topological_order(&dag, &indices, &predecessors);
    if order.len() < table.len() {
        let node = cycle_member(&dag, &order);
        tracing::warn!("Graph {} contains a cycle through node {}", graph.id, node);
        return Err(GraphError::CyclicGraph { node });
    }

    Ok(DependencyPlan {
        dag,
        indices,
        order,
        predecessors,
    })
}

/// Kahn's algorithm with an ordered ready set
fn topological_order(
    dag: &DiGraph<NodeId, ()>,
    indices: &HashMap<NodeId, NodeIndex>,
    predecessors: &BTreeMap<NodeId, BTreeSet<NodeId>>,
) -> Vec<NodeId> {
    let mut in_degree: HashMap<&NodeId, usize> =
        predecessors.iter().map(|(id, p)| (id, p.len())).collect();
    let mut ready: BTreeSet<NodeId> = predecessors
        .iter()
        .filter(|(_, p)| p.is_empty())
        .map(|(id, _)| id.clone())
        .collect();
    let mut order = Vec::with_capacity(predecessors.len());

    while let Some(id) = ready.pop_first() {
        if let Some(&idx) = indices.get(&id) {
            for succ in dag.neighbors_directed(idx, Direction::Outgoing) {
                let succ_id = &dag[succ];
                if let Some(degree) = in_degree.get_mut(succ_id) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(succ_id.clone());
                    }
                }
            }
        }
        order.push(id);
    }

    order
}

/// Smallest node id sitting on an actual cycle
fn cycle_member(dag: &DiGraph<NodeId, ()>, ordered: &[NodeId]) -> NodeId {
    let on_cycle = tarjan_scc(dag)
        .into_iter()
        .filter(|scc| scc.len() > 1 || dag.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(|idx| dag[idx].clone())
        .min();

    on_cycle.unwrap_or_else(|| {
        let ordered: HashSet<&NodeId> = ordered.iter().collect();
        dag.node_weights()
            .filter(|id| !ordered.contains(id))
            .min()
            .cloned()
            .unwrap_or_else(|| NodeId::new(""))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivetcore::{DataType, PortDefinition};

    fn ports_for(graph: &Graph) -> HashMap<NodeId, NodePorts> {
        graph
            .nodes
            .iter()
            .map(|n| {
                (
                    n.id.clone(),
                    NodePorts {
                        inputs: vec![
                            PortDefinition::new("in", DataType::Any),
                            PortDefinition::new("in2", DataType::Any),
                        ],
                        outputs: vec![PortDefinition::new("out", DataType::Any)],
                    },
                )
            })
            .collect()
    }

    fn graph_of(ids: &[&str], edges: &[(&str, &str, &str)]) -> Graph {
        let mut graph = Graph::with_id("g", "test");
        for id in ids {
            graph.add_node(NodeSpec::with_id(*id, "test"));
        }
        for (from, to, port) in edges {
            graph.connect(*from, "out", *to, *port);
        }
        graph
    }

    #[test]
    fn orders_diamond_deterministically() {
        let graph = graph_of(
            &["d", "c", "b", "a"],
            &[("a", "b", "in"), ("a", "c", "in"), ("b", "d", "in"), ("c", "d", "in2")],
        );
        let plan = resolve(&graph, &ports_for(&graph)).unwrap();

        let order: Vec<&str> = plan.order().iter().map(NodeId::as_str).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(plan.roots(), vec![NodeId::new("a")]);

        let preds: Vec<&str> = plan
            .predecessors(&NodeId::new("d"))
            .unwrap()
            .iter()
            .map(NodeId::as_str)
            .collect();
        assert_eq!(preds, vec!["b", "c"]);
        assert_eq!(
            plan.descendants(&NodeId::new("b")),
            vec![NodeId::new("d")]
        );
    }

    #[test]
    fn rejects_two_node_cycle() {
        let graph = graph_of(&["a", "b"], &[("a", "b", "in"), ("b", "a", "in")]);
        let err = resolve(&graph, &ports_for(&graph)).unwrap_err();
        assert_eq!(err, GraphError::CyclicGraph { node: NodeId::new("a") });
    }

    #[test]
    fn names_cycle_member_not_downstream_node() {
        // "a" only hangs off the cycle b <-> c
        let graph = graph_of(
            &["a", "b", "c"],
            &[("b", "c", "in"), ("c", "b", "in"), ("c", "a", "in")],
        );
        let err = resolve(&graph, &ports_for(&graph)).unwrap_err();
        assert_eq!(err, GraphError::CyclicGraph { node: NodeId::new("b") });
    }

    #[test]
    fn rejects_self_loop() {
        let graph = graph_of(&["a"], &[("a", "a", "in")]);
        assert!(matches!(
            resolve(&graph, &ports_for(&graph)),
            Err(GraphError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn rejects_dangling_connection() {
        let graph = graph_of(&["a"], &[("a", "ghost", "in")]);
        match resolve(&graph, &ports_for(&graph)) {
            Err(GraphError::MalformedGraph { connection, .. }) => {
                assert_eq!(connection, "a.out -> ghost.in");
            }
            other => panic!("expected MalformedGraph, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_port() {
        let graph = graph_of(&["a", "b"], &[("a", "b", "nope")]);
        assert!(matches!(
            resolve(&graph, &ports_for(&graph)),
            Err(GraphError::MalformedGraph { .. })
        ));
    }

    #[test]
    fn rejects_second_wire_into_same_input() {
        let graph = graph_of(&["a", "b", "c"], &[("a", "c", "in"), ("b", "c", "in")]);
        assert!(matches!(
            resolve(&graph, &ports_for(&graph)),
            Err(GraphError::MalformedGraph { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let graph = graph_of(&["a", "a"], &[]);
        assert_eq!(
            resolve(&graph, &ports_for(&graph)).unwrap_err(),
            GraphError::DuplicateNode(NodeId::new("a"))
        );
    }
}
