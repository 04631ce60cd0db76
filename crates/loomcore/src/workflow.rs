use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type EventId = Uuid;

/// Relationship a link edge expresses between two actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Producer output feeds the consumer; consumer waits for producer.
    Data,
    /// Marks terminal success of a branch; the target is never dispatched.
    Done,
    /// Fan-out to multiple next actions, parallel eligible.
    Composite,
    /// Re-enters the loop body with an updated enumerator cursor.
    Loop,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkKind::Data => "data",
            LinkKind::Done => "done",
            LinkKind::Composite => "composite",
            LinkKind::Loop => "loop",
        };
        f.write_str(s)
    }
}

/// Complete workflow definition, read-only input for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub id: WorkflowId,
    pub name: String,
    pub actions: Vec<WorkflowAction>,
    #[serde(default)]
    pub relation: Vec<Relation>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

fn default_true() -> bool {
    true
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            actions: Vec::new(),
            relation: Vec::new(),
            is_active: true,
            is_deleted: false,
        }
    }

    pub fn add_action(&mut self, action: WorkflowAction) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn relate(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        link: LinkKind,
    ) -> &mut Self {
        self.relation.push(Relation {
            from: from.into(),
            to: to.into(),
            link,
        });
        self
    }

    pub fn find_action(&self, id: &str) -> Option<&WorkflowAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// The action flagged as the webhook entry point, if any.
    pub fn webhook_action(&self) -> Option<&WorkflowAction> {
        self.actions
            .iter()
            .find(|a| a.node_mode == Some(NodeMode::Webhook))
    }
}

/// One instantiated node within a workflow, bound to input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Static values plus `$`-prefixed path expressions into run state.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub node_mode: Option<NodeMode>,
    #[serde(default)]
    pub respond_mode: RespondMode,
    #[serde(default)]
    pub respond_data: RespondData,
    /// Loop iteration bound; 0 means unbounded.
    #[serde(default)]
    pub times: u64,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub connect_id: Option<String>,
}

impl WorkflowAction {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: None,
            inputs: HashMap::new(),
            node_mode: None,
            respond_mode: RespondMode::default(),
            respond_data: RespondData::default(),
            times: 0,
            timeout_ms: None,
            connect_id: None,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_times(mut self, times: u64) -> Self {
        self.times = times;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn as_webhook(mut self, respond_mode: RespondMode, respond_data: RespondData) -> Self {
        self.node_mode = Some(NodeMode::Webhook);
        self.respond_mode = respond_mode;
        self.respond_data = respond_data;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    Webhook,
}

/// When the HTTP caller of a webhook-triggered run unblocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RespondMode {
    /// As soon as the webhook action itself completes.
    OnCall,
    /// When the designated respond node completes.
    OnNode,
    /// When the whole run reaches a terminal state.
    #[default]
    OnFinished,
}

/// Which payload the HTTP caller of a webhook-triggered run receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RespondData {
    NodeResult,
    #[default]
    WorkflowResult,
}

/// Edge in the workflow relation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub link: LinkKind,
}

/// Normalized inbound event, consumed uniformly by the engine regardless
/// of origin (manual call, scheduled tick, or verified webhook).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub workflow_id: WorkflowId,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl TriggerMessage {
    pub fn manual(workflow_id: WorkflowId, body: Value) -> Self {
        Self {
            workflow_id,
            method: "POST".to_string(),
            url: String::new(),
            query: HashMap::new(),
            body,
        }
    }

    pub fn scheduled(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            method: "SCHEDULE".to_string(),
            url: String::new(),
            query: HashMap::new(),
            body: Value::Null,
        }
    }
}

/// Reusable external-system credential, indexed by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}
