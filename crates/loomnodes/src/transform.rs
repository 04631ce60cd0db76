use async_trait::async_trait;
use loomcore::{resolve_path, Node, NodeContext, NodeError, WorkflowAction};
use loomruntime::{NodeFactory, NodeInfo};
use serde_json::Value;

/// Projects a value out of run state. The engine resolves the `value`
/// input binding before execution, so this node simply forwards it:
/// `{"value": "$fetch.items[0]"}` outputs that element.
pub struct PickNode;

#[async_trait]
impl Node for PickNode {
    fn kind(&self) -> &str {
        "transform.pick"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(ctx.require_input("value")?.clone())
    }
}

pub struct PickNodeFactory;

impl NodeFactory for PickNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(PickNode))
    }

    fn kind(&self) -> &str {
        "transform.pick"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Project a bound value out of run state".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Renders a string template against run state. `{{path}}` placeholders
/// use the same path syntax as input bindings, without the leading `$`:
/// `"hello {{trigger.body.user}}"`.
pub struct TemplateNode;

#[async_trait]
impl Node for TemplateNode {
    fn kind(&self) -> &str {
        "transform.template"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let template = ctx.require_str("template")?.to_string();
        let state = ctx.state.read().await;

        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| NodeError::ExecutionFailed("unclosed '{{' placeholder".to_string()))?;
            let path = after[..end].trim();
            let value = resolve_path(&state, &format!("${path}"))
                .map_err(|e| NodeError::ExecutionFailed(format!("placeholder '{path}': {e}")))?;
            match value {
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        Ok(Value::String(out))
    }
}

pub struct TemplateNodeFactory;

impl NodeFactory for TemplateNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(TemplateNode))
    }

    fn kind(&self) -> &str {
        "transform.template"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Render a {{path}} template against run state".to_string(),
            category: "transform".to_string(),
        }
    }
}
