//! Core abstractions for the rivet graph engine
//!
//! This crate provides the graph model, the node contract, the error taxonomy
//! and the code-runner contract that all other components depend on. It has
//! no runtime behavior of its own.

mod code;
mod error;
pub mod events;
mod graph;
mod node;
mod port;
mod status;
mod value;

pub use code::{Capability, CodeRunner, CodeRunnerOptions};
pub use error::{FlowError, GraphError, NodeError, NodeFailure, SandboxError, StatusError};
pub use events::*;
pub use graph::{
    Connection, ExternalInputs, Graph, GraphId, NodeId, NodeSpec, PortRef, Project, ProjectId,
    ProjectMetadata, VisualData,
};
pub use node::{
    GraphInvoker, Node, NodeContext, NodeOutput, GRAPH_INPUT_TYPE, GRAPH_OUTPUT_TYPE,
};
pub use port::{DataType, NodePorts, PortDefinition};
pub use status::{FailureDetail, FailureKind, NodeInstanceId, RunState, RunStatus};
pub use value::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, FlowError>;
