use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("trace not found for event {0}")]
    TraceNotFound(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fatal workflow configuration errors, surfaced before any action runs.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("unknown node kind: {0}")]
    UnknownKind(String),

    #[error("relation references unknown action: {0}")]
    UnknownAction(String),

    #[error("duplicate action id: {0}")]
    DuplicateAction(String),

    #[error("link type mismatch on {from} -> {to}: {side} does not declare '{link}'")]
    LinkMismatch {
        from: String,
        to: String,
        link: String,
        side: String,
    },

    #[error("cyclic relation outside of loop links")]
    CyclicRelation,

    #[error("malformed input expression '{expr}': {reason}")]
    BadExpression { expr: String, reason: String },

    #[error("unknown connect id: {0}")]
    UnknownConnect(String),

    #[error("node for action '{action}' failed to initialize: {reason}")]
    NodeInit { action: String, reason: String },

    #[error("respond node '{0}' does not exist in the workflow")]
    UnknownRespondNode(String),

    #[error("workflow is not active")]
    Inactive,
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("invalid input type for '{field}': expected {expected}")]
    InvalidInputType { field: String, expected: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("cursor out of range: next called with index {index}, source has {len} items")]
    CursorOutOfRange { index: u64, len: u64 },

    #[error("operation '{0}' not supported by this node kind")]
    Unsupported(&'static str),

    #[error("timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    /// Timeouts keep a fixed classification so callers can tell
    /// "node failed" apart from "node never returned".
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeError::Timeout { .. })
    }
}

/// Webhook verification/decryption failures, rejected at the adapter
/// boundary before anything reaches the engine.
#[derive(Error, Debug, Clone)]
pub enum VerifyError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("method {got} not allowed, webhook expects {want}")]
    MethodMismatch { got: String, want: String },

    #[error("workflow {0} has no webhook action")]
    NoWebhookAction(String),
}
