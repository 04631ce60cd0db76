use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, WorkflowAction};
use loomruntime::{NodeFactory, NodeInfo};
use serde_json::{json, Value};

/// Outbound HTTP request node. The per-action `timeout_ms` bound is
/// enforced by the engine around `execute`.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn kind(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let url = ctx.require_str("url")?;
        let method = ctx.input_str_or("method", "GET").to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            other => {
                return Err(NodeError::Configuration(format!(
                    "unsupported method: {other}"
                )))
            }
        };

        if let Some(Value::Object(headers)) = ctx.inputs.get("headers") {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key, v);
                }
            }
        }

        // Credential headers, when the action is bound to a connect.
        if let Some(connect) = &ctx.connect {
            if let Some(token) = connect.data.get("bearer_token").and_then(|v| v.as_str()) {
                request = request.header("Authorization", format!("Bearer {token}"));
            }
        }

        if let Some(body) = ctx.inputs.get("body") {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("http request: {e}")))?;

        let status = response.status().as_u16();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("http response: {e}")))?;

        // Expose JSON bodies structurally, anything else as text.
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(json!({
            "status": status,
            "headers": headers,
            "body": body,
        }))
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(HttpRequestNode::new()))
    }

    fn kind(&self) -> &str {
        "http.request"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Make an outbound HTTP request".to_string(),
            category: "http".to_string(),
        }
    }
}
