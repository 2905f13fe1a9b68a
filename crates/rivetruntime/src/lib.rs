//! Graph execution runtime
//!
//! This crate provides the engine that runs graphs: the node registry, the
//! dependency resolver, the concurrent scheduler with split-run fan-out, and
//! the run status tracker observers read from.

mod executor;
mod registry;
pub mod resolver;
mod runtime;
mod split;
mod status;

pub use executor::{ExecutionOutcome, GraphExecutor, PreparedGraph};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry};
pub use resolver::{resolve, DependencyPlan};
pub use runtime::{ExecutionHandle, ProjectRuntime, RuntimeConfig};
pub use status::StatusTracker;
