use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeLinks, WorkflowAction};
use loomruntime::{NodeFactory, NodeInfo};
use serde_json::Value;

/// Entry node for manually or schedule-triggered runs. Its output is the
/// trigger body, which downstream actions reference as `$<action id>` or
/// `$current`.
pub struct ManualTriggerNode;

#[async_trait]
impl Node for ManualTriggerNode {
    fn kind(&self) -> &str {
        "trigger.manual"
    }

    fn links(&self) -> NodeLinks {
        NodeLinks::source()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(ctx.trigger.body.clone())
    }
}

pub struct ManualTriggerNodeFactory;

impl NodeFactory for ManualTriggerNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ManualTriggerNode))
    }

    fn kind(&self) -> &str {
        "trigger.manual"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Entry point for manual and scheduled runs".to_string(),
            category: "trigger".to_string(),
        }
    }
}

/// Entry node for webhook-triggered runs. Outputs the full normalized
/// trigger message (method, url, query, body) so downstream actions can
/// bind any part of the inbound request.
pub struct WebhookTriggerNode;

#[async_trait]
impl Node for WebhookTriggerNode {
    fn kind(&self) -> &str {
        "trigger.webhook"
    }

    fn links(&self) -> NodeLinks {
        NodeLinks::source()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        serde_json::to_value(ctx.trigger.as_ref())
            .map_err(|e| NodeError::ExecutionFailed(e.to_string()))
    }
}

pub struct WebhookTriggerNodeFactory;

impl NodeFactory for WebhookTriggerNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(WebhookTriggerNode))
    }

    fn kind(&self) -> &str {
        "trigger.webhook"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Entry point for verified webhook deliveries".to_string(),
            category: "trigger".to_string(),
        }
    }
}
