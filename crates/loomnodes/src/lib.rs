//! Standard node library
//!
//! Built-in node kinds covering the engine's execution contract: entry
//! triggers, run-state transforms, the array enumerator, agent
//! invocation, outbound HTTP, and structured logging.

mod agent;
mod enumerator;
mod http;
mod log;
mod transform;
mod trigger;

pub use agent::{
    AgentCallNode, AgentCallNodeFactory, AgentInvokeRequest, AgentInvoker, AgentRunData,
    HttpAgentInvoker,
};
pub use enumerator::ItemsLoopNode;
pub use http::HttpRequestNode;
pub use log::LogNode;
pub use transform::{PickNode, TemplateNode};
pub use trigger::{ManualTriggerNode, WebhookTriggerNode};

use loomruntime::NodeRegistry;
use std::sync::Arc;

/// Register every built-in node kind except `agent.call`, which needs an
/// invoker; see [`register_agent`].
pub fn register_builtin(registry: &mut NodeRegistry) {
    registry.register(Arc::new(trigger::ManualTriggerNodeFactory));
    registry.register(Arc::new(trigger::WebhookTriggerNodeFactory));
    registry.register(Arc::new(transform::PickNodeFactory));
    registry.register(Arc::new(transform::TemplateNodeFactory));
    registry.register(Arc::new(enumerator::ItemsLoopNodeFactory));
    registry.register(Arc::new(http::HttpRequestNodeFactory));
    registry.register(Arc::new(log::LogNodeFactory));
}

/// Register the `agent.call` kind bound to an invocation service.
pub fn register_agent(registry: &mut NodeRegistry, invoker: Arc<dyn AgentInvoker>) {
    registry.register(Arc::new(AgentCallNodeFactory::new(invoker)));
}
