use rivetcore::{GraphError, Node, NodeError, NodeSpec, Project};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create the node for `spec`. `project` lets node kinds that reference
    /// other graphs (subgraphs) derive their ports.
    fn create(&self, spec: &NodeSpec, project: &Project) -> Result<Box<dyn Node>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry mapping a type tag to the node kind implementing it
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create the node instance for a spec
    pub fn create_node(
        &self,
        spec: &NodeSpec,
        project: &Project,
    ) -> Result<Arc<dyn Node>, GraphError> {
        let factory =
            self.factories
                .get(&spec.node_type)
                .ok_or_else(|| GraphError::UnknownNodeType {
                    node_id: spec.id.clone(),
                    node_type: spec.node_type.clone(),
                })?;

        factory
            .create(spec, project)
            .map(Arc::from)
            .map_err(|e| GraphError::NodeCreation {
                node_id: spec.id.clone(),
                reason: e.to_string(),
            })
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
