//! Run status tracking: the single write path for node execution state.

use chrono::Utc;
use rivetcore::{
    EventBus, ExecutionEvent, ExecutionId, FailureKind, Graph, GraphId, NodeError, NodeId,
    NodeInstanceId, RunState, RunStatus, StatusError,
};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Per-instance state machine for one execution pass.
///
/// Legal transitions are `idle -> running`, `running -> ok`,
/// `running -> error`, plus `idle -> error` for a propagated failure (a node
/// that is never dispatched because an ancestor failed). Anything else is
/// rejected with [`StatusError::IllegalTransition`].
pub struct StatusTracker {
    execution_id: ExecutionId,
    graph_id: GraphId,
    records: RwLock<BTreeMap<NodeInstanceId, RunStatus>>,
    events: Arc<EventBus>,
}

impl StatusTracker {
    pub fn new(execution_id: ExecutionId, graph_id: GraphId, events: Arc<EventBus>) -> Self {
        Self {
            execution_id,
            graph_id,
            records: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }

    /// Reset every node of `graph` to idle and forget previous split instances
    pub fn begin_graph(&self, graph: &Graph) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.clear();
        for node in &graph.nodes {
            records.insert(NodeInstanceId::node(node.id.clone()), RunStatus::idle());
        }
    }

    /// Create idle records for split instances `0..count` of `node`
    pub fn add_split_instances(&self, node: &NodeId, count: usize) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        for index in 0..count {
            records
                .entry(NodeInstanceId::split(node.clone(), index))
                .or_insert_with(RunStatus::idle);
        }
    }

    /// Move `instance` to `next`. `failure` is required for, and only
    /// recorded on, a transition to error.
    pub fn transition(
        &self,
        instance: &NodeInstanceId,
        next: RunState,
        failure: Option<&NodeError>,
    ) -> Result<(), StatusError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(instance)
            .ok_or_else(|| StatusError::UnknownInstance(instance.clone()))?;
        let current = record.state;

        let propagated = failure.map(NodeError::kind) == Some(FailureKind::PropagatedFailure);
        let legal = matches!(
            (current, next),
            (RunState::Idle, RunState::Running)
                | (RunState::Running, RunState::Ok)
                | (RunState::Running, RunState::Error)
        ) || (current == RunState::Idle && next == RunState::Error && propagated);
        if !legal {
            tracing::error!(
                "Illegal status transition for {}: {} -> {}",
                instance,
                current,
                next
            );
            return Err(StatusError::IllegalTransition {
                instance: instance.clone(),
                from: current,
                to: next,
            });
        }

        let detail = match next {
            RunState::Error => Some(
                failure
                    .ok_or_else(|| StatusError::MissingFailureDetail(instance.clone()))?
                    .detail(),
            ),
            _ => None,
        };

        let now = Utc::now();
        match next {
            RunState::Running => record.started_at = Some(now),
            _ => record.ended_at = Some(now),
        }
        record.state = next;
        record.error = detail.clone();
        drop(records);

        self.events.emit(ExecutionEvent::StatusChanged {
            execution_id: self.execution_id,
            instance: instance.clone(),
            from: current,
            to: next,
            error: detail,
            timestamp: now,
        });
        Ok(())
    }

    pub fn start(&self, instance: &NodeInstanceId) -> Result<(), StatusError> {
        self.transition(instance, RunState::Running, None)
    }

    pub fn succeed(&self, instance: &NodeInstanceId) -> Result<(), StatusError> {
        self.transition(instance, RunState::Ok, None)
    }

    pub fn fail(&self, instance: &NodeInstanceId, error: &NodeError) -> Result<(), StatusError> {
        self.transition(instance, RunState::Error, Some(error))
    }

    pub fn status(&self, instance: &NodeInstanceId) -> Option<RunStatus> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance)
            .cloned()
    }

    /// Copy of every record, ordered by node id then instance index
    pub fn snapshot(&self) -> BTreeMap<NodeInstanceId, RunStatus> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Split instances of `node` that have reached a terminal state
    pub fn completed_instances(&self, node: &NodeId) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, status)| {
                &id.node_id == node && id.is_split_instance() && status.state.is_terminal()
            })
            .count()
    }

    /// Stream of transition events. Events of every execution sharing the bus
    /// are delivered; filter on [`ExecutionEvent::execution_id`].
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivetcore::NodeSpec;

    fn tracker() -> StatusTracker {
        let mut graph = Graph::with_id("g", "test");
        graph.add_node(NodeSpec::with_id("a", "test"));
        graph.add_node(NodeSpec::with_id("b", "test"));
        let tracker = StatusTracker::new(
            ExecutionId::new_v4(),
            graph.id.clone(),
            Arc::new(EventBus::new(16)),
        );
        tracker.begin_graph(&graph);
        tracker
    }

    #[test]
    fn walks_the_legal_lifecycle() {
        let tracker = tracker();
        let a = NodeInstanceId::node("a");

        assert_eq!(tracker.status(&a).unwrap().state, RunState::Idle);
        tracker.start(&a).unwrap();
        tracker.succeed(&a).unwrap();

        let status = tracker.status(&a).unwrap();
        assert_eq!(status.state, RunState::Ok);
        assert!(status.started_at.is_some());
        assert!(status.ended_at.is_some());
        assert!(status.error.is_none());
    }

    #[test]
    fn terminal_states_are_final() {
        let tracker = tracker();
        let a = NodeInstanceId::node("a");
        tracker.start(&a).unwrap();
        tracker.succeed(&a).unwrap();

        let err = tracker.start(&a).unwrap_err();
        assert_eq!(
            err,
            StatusError::IllegalTransition {
                instance: a.clone(),
                from: RunState::Ok,
                to: RunState::Running,
            }
        );
        let err = tracker
            .fail(&a, &NodeError::ExecutionFailed("late".into()))
            .unwrap_err();
        assert!(matches!(err, StatusError::IllegalTransition { .. }));
        assert_eq!(tracker.status(&a).unwrap().state, RunState::Ok);
    }

    #[test]
    fn idle_to_ok_is_illegal() {
        let tracker = tracker();
        let b = NodeInstanceId::node("b");
        assert!(matches!(
            tracker.succeed(&b),
            Err(StatusError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn only_propagated_failures_skip_running() {
        let tracker = tracker();
        let b = NodeInstanceId::node("b");

        let direct = NodeError::ExecutionFailed("boom".into());
        assert!(tracker.fail(&b, &direct).is_err());

        let propagated = NodeError::PropagatedFailure {
            origin: NodeId::new("a"),
        };
        tracker.fail(&b, &propagated).unwrap();
        let status = tracker.status(&b).unwrap();
        assert_eq!(status.state, RunState::Error);
        assert_eq!(status.error_kind(), Some(FailureKind::PropagatedFailure));
        assert!(status.started_at.is_none());
    }

    #[test]
    fn error_without_detail_is_rejected() {
        let tracker = tracker();
        let a = NodeInstanceId::node("a");
        tracker.start(&a).unwrap();
        assert_eq!(
            tracker.transition(&a, RunState::Error, None),
            Err(StatusError::MissingFailureDetail(a.clone()))
        );
    }

    #[test]
    fn split_instances_are_tracked_separately() {
        let tracker = tracker();
        let node = NodeId::new("a");
        tracker.add_split_instances(&node, 3);

        tracker.start(&NodeInstanceId::split("a", 2)).unwrap();
        tracker.succeed(&NodeInstanceId::split("a", 2)).unwrap();

        assert_eq!(tracker.completed_instances(&node), 1);
        assert_eq!(
            tracker.status(&NodeInstanceId::split("a", 0)).unwrap().state,
            RunState::Idle
        );
        assert_eq!(
            tracker.status(&NodeInstanceId::node("a")).unwrap().state,
            RunState::Idle
        );
        assert!(tracker.start(&NodeInstanceId::split("a", 3)).is_err());
    }

    #[test]
    fn transitions_are_broadcast() {
        let tracker = tracker();
        let mut events = tracker.subscribe();
        let a = NodeInstanceId::node("a");
        tracker.start(&a).unwrap();

        match events.try_recv().unwrap() {
            ExecutionEvent::StatusChanged {
                instance, from, to, ..
            } => {
                assert_eq!(instance, a);
                assert_eq!(from, RunState::Idle);
                assert_eq!(to, RunState::Running);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn begin_graph_resets_previous_pass() {
        let tracker = tracker();
        let a = NodeInstanceId::node("a");
        tracker.add_split_instances(&NodeId::new("a"), 2);
        tracker.start(&a).unwrap();

        let mut graph = Graph::with_id("g", "test");
        graph.add_node(NodeSpec::with_id("a", "test"));
        tracker.begin_graph(&graph);

        assert_eq!(tracker.status(&a).unwrap().state, RunState::Idle);
        assert!(tracker.status(&NodeInstanceId::split("a", 0)).is_none());
        assert!(tracker.status(&NodeInstanceId::node("b")).is_none());
    }
}
