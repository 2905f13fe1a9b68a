//! Standard node library
//!
//! Built-in node kinds: graph inputs and outputs, subgraph invocation, basic
//! math and array operations, sandboxed code, and debugging helpers.

mod array;
mod code;
mod debug;
mod graph_io;
mod math;
mod subgraph;
mod time;

pub use array::ArrayMergeNode;
pub use code::CodeNode;
pub use debug::DebugNode;
pub use graph_io::{GraphInputNode, GraphOutputNode};
pub use math::{DoubleNode, SumNode};
pub use subgraph::SubgraphNode;
pub use time::DelayNode;

use rivetruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(graph_io::GraphInputNodeFactory));
    registry.register(Arc::new(graph_io::GraphOutputNodeFactory));
    registry.register(Arc::new(subgraph::SubgraphNodeFactory));
    registry.register(Arc::new(math::DoubleNodeFactory));
    registry.register(Arc::new(math::SumNodeFactory));
    registry.register(Arc::new(array::ArrayMergeNodeFactory));
    registry.register(Arc::new(code::CodeNodeFactory));
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
}

/// A registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
