//! Workflow execution runtime
//!
//! This crate provides the execution engine that interprets workflow
//! graphs, the node and connect registries, and the event mediator that
//! forms the run boundary (trigger submission, tracing, cancellation).

mod executor;
mod mediator;
mod registry;
mod runtime;

pub use executor::{ExecutionEngine, LoadedWorkflow, RunOutcome};
pub use mediator::{EventMediator, EventReceipt, Responder};
pub use registry::{
    init_global_registry, try_global_registry, ConnectRegistry, NodeFactory, NodeInfo, NodeRegistry,
};
pub use runtime::{LoomRuntime, RuntimeConfig};
