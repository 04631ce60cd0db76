use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, WorkflowAction};
use loomruntime::{NodeFactory, NodeInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Request contract for the external agent invocation service. The
/// service's internals (prompts, tools, models) are opaque here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvokeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<Value>,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_wait")]
    pub wait_output: bool,
    #[serde(default)]
    pub persistent_history: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunData {
    pub run_data: Value,
}

/// Seam for the agent invocation collaborator, so the node library works
/// against any transport (and tests inject a fake).
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: AgentInvokeRequest) -> Result<AgentRunData, NodeError>;
}

/// Invoker posting requests to a remote agent service over HTTP.
pub struct HttpAgentInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAgentInvoker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn from_env() -> Self {
        let endpoint = std::env::var("AGENT_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:8700/api/agent/invoke".to_string());
        Self::new(endpoint)
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(&self, request: AgentInvokeRequest) -> Result<AgentRunData, NodeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("agent service: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::ExecutionFailed(format!(
                "agent service returned {status}"
            )));
        }

        response
            .json::<AgentRunData>()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("agent response: {e}")))
    }
}

/// Invokes an agent with the action's resolved inputs and outputs the
/// service's `run_data`.
pub struct AgentCallNode {
    invoker: Arc<dyn AgentInvoker>,
}

impl AgentCallNode {
    pub fn with_invoker(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Node for AgentCallNode {
    fn kind(&self) -> &str {
        "agent.call"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let agent_id = ctx
            .inputs
            .get("agent_id")
            .and_then(|v| v.as_str())
            .map(String::from);
        let agent_config = ctx.inputs.get("agent_config").cloned();
        if agent_id.is_none() && agent_config.is_none() {
            return Err(NodeError::MissingInput("agent_id".to_string()));
        }

        let request = AgentInvokeRequest {
            agent_id,
            agent_config,
            input: ctx.input_or("input", Value::Null),
            thread_id: ctx
                .inputs
                .get("thread_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            user_id: ctx
                .inputs
                .get("user_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            stream: ctx
                .inputs
                .get("stream")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            wait_output: ctx
                .inputs
                .get("wait_output")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            persistent_history: ctx
                .inputs
                .get("persistent_history")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        };

        let data = self.invoker.invoke(request).await?;
        Ok(data.run_data)
    }
}

pub struct AgentCallNodeFactory {
    invoker: Arc<dyn AgentInvoker>,
}

impl AgentCallNodeFactory {
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }
}

impl NodeFactory for AgentCallNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(AgentCallNode {
            invoker: self.invoker.clone(),
        }))
    }

    fn kind(&self) -> &str {
        "agent.call"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Invoke the agent service and output its run data".to_string(),
            category: "agent".to_string(),
        }
    }
}
