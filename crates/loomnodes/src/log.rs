use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, WorkflowAction};
use loomruntime::{NodeFactory, NodeInfo};
use serde_json::Value;

/// Logs its resolved inputs and passes them through as output.
pub struct LogNode;

#[async_trait]
impl Node for LogNode {
    fn kind(&self) -> &str {
        "log.message"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let message = ctx.input_str_or("message", "");
        tracing::info!(action = %ctx.action_id, message, "log node");
        for (key, value) in &ctx.inputs {
            if key != "message" {
                tracing::debug!(action = %ctx.action_id, %key, %value, "log node input");
            }
        }
        Ok(Value::Object(ctx.inputs.clone().into_iter().collect()))
    }
}

pub struct LogNodeFactory;

impl NodeFactory for LogNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LogNode))
    }

    fn kind(&self) -> &str {
        "log.message"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Log resolved inputs, passthrough output".to_string(),
            category: "debug".to_string(),
        }
    }
}
