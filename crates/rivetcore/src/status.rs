use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node, or one split-run instance of it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeInstanceId {
    pub node_id: NodeId,
    /// `None` for the aggregate node record, `Some(i)` for split instance `i`
    pub index: Option<usize>,
}

impl NodeInstanceId {
    pub fn node(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            index: None,
        }
    }

    pub fn split(node_id: impl Into<NodeId>, index: usize) -> Self {
        Self {
            node_id: node_id.into(),
            index: Some(index),
        }
    }

    pub fn is_split_instance(&self) -> bool {
        self.index.is_some()
    }
}

impl fmt::Display for NodeInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}#{}", self.node_id, i),
            None => write!(f, "{}", self.node_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Ok,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Ok | RunState::Error)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Ok => "ok",
            RunState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Machine-checkable classification of a node failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingInput,
    SplitLengthMismatch,
    NodeCompute,
    PropagatedFailure,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

/// Status record of one node instance during one execution pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<FailureDetail>,
}

impl RunStatus {
    pub fn idle() -> Self {
        Self {
            state: RunState::Idle,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::idle()
    }
}
