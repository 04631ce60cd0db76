use crate::{events::EventEmitter, ConnectConfig, LinkKind, NodeError, RunState, TriggerMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Core trait implemented by every executable node kind.
///
/// Single-shot nodes (transforms, triggers, agent calls) implement
/// `execute`. Enumerator nodes (loop drivers) implement `first`/`next`
/// instead. The unimplemented half defaults to [`NodeError::Unsupported`];
/// load-time link validation keeps it unreachable in well-formed
/// workflows.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique kind identifier (e.g. "transform.pick", "loop.items").
    fn kind(&self) -> &str;

    /// Link kinds this node accepts on incoming edges and may produce on
    /// outgoing edges. Validated against the relation list at load time.
    fn links(&self) -> NodeLinks {
        NodeLinks::default()
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        Err(NodeError::Unsupported("execute"))
    }

    /// Obtain the initial enumerator cursor.
    async fn first(&self, _ctx: NodeContext) -> Result<EnumeratorCursor, NodeError> {
        Err(NodeError::Unsupported("first"))
    }

    /// Advance past the cursor index `prev`. Advancing past the last
    /// valid index is an error, never a silent stop.
    async fn next(&self, _ctx: NodeContext, _prev: u64) -> Result<EnumeratorCursor, NodeError> {
        Err(NodeError::Unsupported("next"))
    }
}

/// Declared link directions for a node kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLinks {
    pub inputs: Vec<LinkKind>,
    pub outputs: Vec<LinkKind>,
}

impl Default for NodeLinks {
    fn default() -> Self {
        Self {
            inputs: vec![
                LinkKind::Data,
                LinkKind::Done,
                LinkKind::Composite,
                LinkKind::Loop,
            ],
            outputs: vec![LinkKind::Data, LinkKind::Done, LinkKind::Composite],
        }
    }
}

impl NodeLinks {
    /// Entry nodes: no incoming edges.
    pub fn source() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: vec![LinkKind::Data, LinkKind::Done, LinkKind::Composite],
        }
    }

    /// Enumerator nodes additionally produce `Loop` edges.
    pub fn enumerator() -> Self {
        Self {
            inputs: vec![LinkKind::Data, LinkKind::Done, LinkKind::Composite],
            outputs: vec![
                LinkKind::Data,
                LinkKind::Done,
                LinkKind::Composite,
                LinkKind::Loop,
            ],
        }
    }

    pub fn accepts_input(&self, link: LinkKind) -> bool {
        self.inputs.contains(&link)
    }

    pub fn produces_output(&self, link: LinkKind) -> bool {
        self.outputs.contains(&link)
    }
}

/// Loop iteration state, threaded explicitly between `first` and
/// successive `next` calls. `current` increases strictly by 1; `eof` is
/// the sole termination signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumeratorCursor {
    pub current: u64,
    pub eof: bool,
    pub data: Value,
}

impl EnumeratorCursor {
    pub fn item(current: u64, data: Value) -> Self {
        Self {
            current,
            eof: false,
            data,
        }
    }

    pub fn end(current: u64) -> Self {
        Self {
            current,
            eof: true,
            data: Value::Null,
        }
    }
}

/// Execution context passed to each node entry point.
#[derive(Clone)]
pub struct NodeContext {
    pub action_id: String,

    /// Inputs with path expressions already resolved against run state.
    pub inputs: HashMap<String, Value>,

    /// Read access to upstream outputs.
    pub state: Arc<RwLock<RunState>>,

    /// The normalized trigger that started this run.
    pub trigger: Arc<TriggerMessage>,

    /// Credential bound via the action's `connect_id`, if any.
    pub connect: Option<Arc<ConnectConfig>>,

    pub events: EventEmitter,

    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    /// Get required input or return error.
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get required input as a string.
    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        self.require_input(name)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "string".to_string(),
            })
    }

    /// Get input with a default.
    pub fn input_or(&self, name: &str, default: Value) -> Value {
        self.inputs.get(name).cloned().unwrap_or(default)
    }

    pub fn input_str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.inputs.get(name).and_then(|v| v.as_str()).unwrap_or(default)
    }

    /// Read a value out of run state by symbolic key.
    pub async fn state_value(&self, key: &str) -> Option<Value> {
        self.state.read().await.get(key).cloned()
    }
}
