use relaycore::{NodeCatalog, NodeExecutor, NodeType, RegistryError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating executor instances
pub trait ExecutorFactory: Send + Sync {
    /// Create a fresh executor. Executors hold no state between invocations.
    fn create(&self) -> Box<dyn NodeExecutor>;

    /// Optional: Get node metadata (description, input/output ports, etc.)
    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl ExecutorMetadata {
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, name: &str, description: &str, required: bool) -> Self {
        self.inputs.push(PortDefinition::new(name, description, required));
        self
    }

    pub fn with_output(mut self, name: &str, description: &str) -> Self {
        self.outputs.push(PortDefinition::new(name, description, false));
        self
    }
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(name: &str, description: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required,
        }
    }
}

/// Adapts a plain closure into a factory.
struct FnFactory<F> {
    create: F,
    metadata: ExecutorMetadata,
}

impl<F> ExecutorFactory for FnFactory<F>
where
    F: Fn() -> Box<dyn NodeExecutor> + Send + Sync,
{
    fn create(&self) -> Box<dyn NodeExecutor> {
        (self.create)()
    }

    fn metadata(&self) -> ExecutorMetadata {
        self.metadata.clone()
    }
}

/// Registry of executors keyed by node type tag.
///
/// Built once at startup and shared read-only afterwards.
pub struct ExecutorRegistry {
    factories: HashMap<String, Arc<dyn ExecutorFactory>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory. A later registration for the same tag replaces
    /// the earlier one.
    pub fn register(&mut self, node_type: impl Into<NodeType>, factory: Arc<dyn ExecutorFactory>) {
        let node_type = node_type.into();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type.as_str().to_string(), factory);
    }

    /// Register a closure as the factory for `node_type`.
    pub fn register_fn<F>(&mut self, node_type: impl Into<NodeType>, create: F)
    where
        F: Fn() -> Box<dyn NodeExecutor> + Send + Sync + 'static,
    {
        self.register_fn_with_metadata(node_type, ExecutorMetadata::default(), create);
    }

    pub fn register_fn_with_metadata<F>(
        &mut self,
        node_type: impl Into<NodeType>,
        metadata: ExecutorMetadata,
        create: F,
    ) where
        F: Fn() -> Box<dyn NodeExecutor> + Send + Sync + 'static,
    {
        self.register(node_type, Arc::new(FnFactory { create, metadata }));
    }

    /// Create an executor for a node type
    pub fn get(&self, node_type: &str) -> Result<Box<dyn NodeExecutor>, RegistryError> {
        self.factories
            .get(node_type)
            .map(|factory| factory.create())
            .ok_or_else(|| RegistryError::NotFound(node_type.to_string()))
    }

    pub fn has(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn metadata(&self, node_type: &str) -> Option<ExecutorMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Graphs may use any built-in tag plus every registered custom tag.
/// A built-in tag without an executor passes validation and fails at
/// dispatch time.
impl NodeCatalog for ExecutorRegistry {
    fn recognizes(&self, node_type: &NodeType) -> bool {
        node_type.is_builtin() || self.has(node_type.as_str())
    }
}
