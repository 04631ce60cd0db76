use dashmap::DashMap;
use loomcore::{ConfigError, ConnectConfig, Node, NodeError, WorkflowAction};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Factory trait for creating node instances.
pub trait NodeFactory: Send + Sync {
    /// Create a node instance bound to one workflow action.
    fn create(&self, action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError>;

    /// The kind key this factory handles.
    fn kind(&self) -> &str;

    /// Optional: describe the node kind for listings.
    fn info(&self) -> NodeInfo {
        NodeInfo::default()
    }
}

/// Metadata about a node kind.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub description: String,
    pub category: String,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available node kinds. Read-mostly after boot.
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let kind = factory.kind().to_string();
        tracing::info!(kind = %kind, "registering node kind");
        self.factories.insert(kind, factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Create a node instance for an action. An unresolvable kind is a
    /// fatal configuration error, surfaced at workflow load time.
    pub fn create_node(&self, action: &WorkflowAction) -> Result<Box<dyn Node>, ConfigError> {
        let factory = self
            .factories
            .get(&action.kind)
            .ok_or_else(|| ConfigError::UnknownKind(action.kind.clone()))?;

        factory.create(action).map_err(|e| ConfigError::NodeInit {
            action: action.id.clone(),
            reason: e.to_string(),
        })
    }

    pub fn list_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn info(&self, kind: &str) -> Option<NodeInfo> {
        self.factories.get(kind).map(|f| f.info())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<NodeRegistry>> = OnceLock::new();

/// Process-wide registry initialization. Single-flight: the first caller
/// builds the registry, every later (or concurrent) caller gets the same
/// instance and its closure never runs.
pub fn init_global_registry<F>(build: F) -> Arc<NodeRegistry>
where
    F: FnOnce(&mut NodeRegistry),
{
    GLOBAL_REGISTRY
        .get_or_init(|| {
            let mut registry = NodeRegistry::new();
            build(&mut registry);
            Arc::new(registry)
        })
        .clone()
}

/// The global registry, if it has been initialized.
pub fn try_global_registry() -> Option<Arc<NodeRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}

/// Registry of reusable external-system credentials, indexed by id.
/// Process-wide, read-mostly after boot.
pub struct ConnectRegistry {
    entries: DashMap<String, Arc<ConnectConfig>>,
}

impl ConnectRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn insert(&self, config: ConnectConfig) {
        self.entries.insert(config.id.clone(), Arc::new(config));
    }

    pub fn get(&self, id: &str) -> Option<Arc<ConnectConfig>> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ConnectConfig>> {
        self.entries.remove(id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConnectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
