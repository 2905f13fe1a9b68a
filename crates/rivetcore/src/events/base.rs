use crate::{FailureDetail, GraphId, NodeInstanceId, RunState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during graph execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    GraphStarted {
        execution_id: ExecutionId,
        graph_id: GraphId,
        timestamp: DateTime<Utc>,
    },
    GraphCompleted {
        execution_id: ExecutionId,
        graph_id: GraphId,
        success: bool,
        cancelled: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        execution_id: ExecutionId,
        instance: NodeInstanceId,
        from: RunState,
        to: RunState,
        error: Option<FailureDetail>,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        execution_id: ExecutionId,
        instance: NodeInstanceId,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::GraphStarted { execution_id, .. }
            | ExecutionEvent::GraphCompleted { execution_id, .. }
            | ExecutionEvent::StatusChanged { execution_id, .. }
            | ExecutionEvent::NodeEvent { execution_id, .. } => *execution_id,
        }
    }
}

/// Events a node emits about itself while computing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to each node instance
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    instance: NodeInstanceId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        instance: NodeInstanceId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            instance,
            sender,
        }
    }

    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(ExecutionEvent::NodeEvent {
            execution_id: self.execution_id,
            instance: self.instance.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(NodeEvent::Progress { percent, message });
    }
}

/// Broadcast bus shared by the runtime, every execution and every observer
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Sending never fails the engine; without subscribers the event is dropped
    pub fn emit(&self, event: ExecutionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    pub fn create_emitter(
        &self,
        execution_id: ExecutionId,
        instance: NodeInstanceId,
    ) -> EventEmitter {
        EventEmitter::new(execution_id, instance, self.sender.clone())
    }
}
