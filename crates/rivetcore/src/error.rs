use crate::{Capability, FailureDetail, FailureKind, GraphId, NodeId, NodeInstanceId, RunState};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("{} node(s) failed: {}", failures.len(), summarize(failures))]
    NodesFailed { failures: Vec<NodeFailure> },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn summarize(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Structural problems; fatal before any node is dispatched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Graph not found: {0}")]
    NotFound(GraphId),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Malformed graph: connection {connection}: {reason}")]
    MalformedGraph { connection: String, reason: String },

    #[error("Cyclic graph: node {node} is part of a cycle")]
    CyclicGraph { node: NodeId },

    #[error("Unknown node type '{node_type}' for node {node_id}")]
    UnknownNodeType { node_id: NodeId, node_type: String },

    #[error("Node {node_id} could not be created: {reason}")]
    NodeCreation { node_id: NodeId, reason: String },
}

/// Node-local failures; aggregated into the execution outcome
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {port}")]
    MissingInput { port: String },

    #[error("Split-run input '{port}' has {actual} elements, expected {expected} or 1")]
    SplitLengthMismatch {
        port: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Code execution failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Upstream node {origin} failed")]
    PropagatedFailure { origin: NodeId },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            NodeError::MissingInput { .. } => FailureKind::MissingInput,
            NodeError::SplitLengthMismatch { .. } => FailureKind::SplitLengthMismatch,
            NodeError::PropagatedFailure { .. } => FailureKind::PropagatedFailure,
            NodeError::Cancelled => FailureKind::Cancelled,
            NodeError::InvalidInputType { .. }
            | NodeError::Configuration(_)
            | NodeError::ExecutionFailed(_)
            | NodeError::Sandbox(_)
            | NodeError::Timeout { .. } => FailureKind::NodeCompute,
        }
    }

    pub fn detail(&self) -> FailureDetail {
        FailureDetail {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Terminal failure of one node in an execution pass
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub error: NodeError,
}

impl NodeFailure {
    pub fn new(node_id: NodeId, error: NodeError) -> Self {
        Self { node_id, error }
    }

    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}: {}", self.node_id, self.error)
    }
}

/// Misuse of the status tracker. Always a programming error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatusError {
    #[error("Illegal transition for {instance}: {from} -> {to}")]
    IllegalTransition {
        instance: NodeInstanceId,
        from: RunState,
        to: RunState,
    },

    #[error("Unknown node instance: {0}")]
    UnknownInstance(NodeInstanceId),

    #[error("Transition of {0} to error carries no failure detail")]
    MissingFailureDetail(NodeInstanceId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("Capability '{capability}' is not available in the {backend} code runner")]
    CapabilityUnavailable {
        capability: Capability,
        backend: String,
    },

    #[error("Dynamic code execution is disabled")]
    DynamicExecutionDisabled,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid script output: {0}")]
    InvalidOutput(String),

    #[error("Script timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal sandbox error: {0}")]
    Internal(String),
}
