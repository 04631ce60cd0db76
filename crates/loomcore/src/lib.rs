//! Core abstractions for the loom engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the workflow graph model, the node execution
//! contract, per-run state, the step trace, and run events.

mod error;
mod events;
mod expr;
mod node;
mod state;
mod trace;
mod workflow;

pub use error::{ConfigError, EngineError, NodeError, VerifyError};
pub use events::{EventBus, EventEmitter, RunEvent};
pub use expr::{
    is_path_expr, join_path, quote_segment, resolve_inputs, resolve_path, validate_path, PathError,
};
pub use node::{EnumeratorCursor, Node, NodeContext, NodeLinks};
pub use state::{RunState, CURRENT_KEY, TRIGGER_KEY};
pub use trace::{EventTrace, StepStatus, StepTrace};
pub use workflow::{
    ConnectConfig, EventId, LinkKind, NodeMode, Relation, RespondData, RespondMode,
    TriggerMessage, WorkflowAction, WorkflowConfig, WorkflowId,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
