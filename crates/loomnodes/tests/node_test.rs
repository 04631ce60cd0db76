use async_trait::async_trait;
use loomcore::{
    EventBus, Node, NodeContext, NodeError, RunState, TriggerMessage, WorkflowId,
};
use loomnodes::{
    AgentInvokeRequest, AgentInvoker, AgentRunData, ItemsLoopNode, PickNode, TemplateNode,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

fn context(inputs: HashMap<String, Value>, state: RunState) -> NodeContext {
    let bus = EventBus::new(16);
    let event_id = Uuid::new_v4();
    NodeContext {
        action_id: "under-test".to_string(),
        inputs,
        state: Arc::new(RwLock::new(state)),
        trigger: Arc::new(TriggerMessage::manual(WorkflowId::new_v4(), Value::Null)),
        connect: None,
        events: bus.create_emitter(event_id),
        cancellation: tokio_util::sync::CancellationToken::new(),
    }
}

fn inputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------
// Enumerator protocol
// ---------------------------------------------------------------------

/// `first` then repeated `next` yield strictly increasing `current`
/// values until `eof`, and nothing is called past `eof`.
#[tokio::test]
async fn enumerator_cursor_strictly_increases_to_eof() {
    let node = ItemsLoopNode;
    let ctx = context(inputs(&[("items", json!(["a", "b", "c"]))]), RunState::new());

    let mut cursor = node.first(ctx.clone()).await.unwrap();
    let mut seen = Vec::new();
    while !cursor.eof {
        seen.push(cursor.current);
        cursor = node.next(ctx.clone(), cursor.current).await.unwrap();
    }

    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(cursor.current, 3);
    assert!(cursor.eof);
}

#[tokio::test]
async fn enumerator_data_follows_the_source() {
    let node = ItemsLoopNode;
    let ctx = context(inputs(&[("items", json!([10, 20]))]), RunState::new());

    let first = node.first(ctx.clone()).await.unwrap();
    assert_eq!(first.data, json!(10));
    let second = node.next(ctx.clone(), first.current).await.unwrap();
    assert_eq!(second.data, json!(20));
}

#[tokio::test]
async fn enumerator_empty_source_is_immediate_eof() {
    let node = ItemsLoopNode;
    let ctx = context(inputs(&[("items", json!([]))]), RunState::new());

    let cursor = node.first(ctx).await.unwrap();
    assert!(cursor.eof);
    assert_eq!(cursor.current, 0);
}

/// Advancing past the last valid index is an error, not a silent stop.
#[tokio::test]
async fn enumerator_next_past_end_is_an_error() {
    let node = ItemsLoopNode;
    let ctx = context(inputs(&[("items", json!(["only"]))]), RunState::new());

    let err = node.next(ctx, 5).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::CursorOutOfRange { index: 5, len: 1 }
    ));
}

#[tokio::test]
async fn enumerator_requires_an_array() {
    let node = ItemsLoopNode;
    let ctx = context(inputs(&[("items", json!("not an array"))]), RunState::new());
    assert!(matches!(
        node.first(ctx).await,
        Err(NodeError::InvalidInputType { .. })
    ));
}

/// A single-shot entry point on an enumerator kind is unsupported.
#[tokio::test]
async fn enumerator_rejects_execute() {
    let node = ItemsLoopNode;
    let ctx = context(inputs(&[("items", json!([1]))]), RunState::new());
    assert!(matches!(
        node.execute(ctx).await,
        Err(NodeError::Unsupported("execute"))
    ));
}

// ---------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------

#[tokio::test]
async fn pick_forwards_its_bound_value() {
    let node = PickNode;
    let ctx = context(inputs(&[("value", json!({"x": 1}))]), RunState::new());
    assert_eq!(node.execute(ctx).await.unwrap(), json!({"x": 1}));
}

#[tokio::test]
async fn template_renders_paths_from_state() {
    let mut state = RunState::new();
    state.set_output("fetch", json!({"user": {"name": "ada"}, "count": 3}));

    let node = TemplateNode;
    let ctx = context(
        inputs(&[(
            "template",
            json!("{{fetch.user.name}} has {{fetch.count}} items"),
        )]),
        state,
    );
    assert_eq!(
        node.execute(ctx).await.unwrap(),
        json!("ada has 3 items")
    );
}

#[tokio::test]
async fn template_unknown_placeholder_fails() {
    let node = TemplateNode;
    let ctx = context(inputs(&[("template", json!("{{missing.path}}"))]), RunState::new());
    assert!(node.execute(ctx).await.is_err());
}

#[tokio::test]
async fn template_unclosed_placeholder_fails() {
    let node = TemplateNode;
    let ctx = context(inputs(&[("template", json!("oops {{fetch.a"))]), RunState::new());
    assert!(node.execute(ctx).await.is_err());
}

// ---------------------------------------------------------------------
// Agent invocation
// ---------------------------------------------------------------------

struct FakeInvoker {
    seen: Mutex<Vec<AgentInvokeRequest>>,
}

#[async_trait]
impl AgentInvoker for FakeInvoker {
    async fn invoke(&self, request: AgentInvokeRequest) -> Result<AgentRunData, NodeError> {
        let input = request.input.clone();
        self.seen.lock().unwrap().push(request);
        Ok(AgentRunData {
            run_data: json!({"echo": input}),
        })
    }
}

#[tokio::test]
async fn agent_call_forwards_input_and_returns_run_data() {
    let invoker = Arc::new(FakeInvoker {
        seen: Mutex::new(Vec::new()),
    });
    let node = loomnodes::AgentCallNode::with_invoker(invoker.clone());

    let ctx = context(
        inputs(&[
            ("agent_id", json!("triage-bot")),
            ("input", json!({"question": "hello?"})),
            ("thread_id", json!("t-9")),
        ]),
        RunState::new(),
    );

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output, json!({"echo": {"question": "hello?"}}));

    let seen = invoker.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].agent_id.as_deref(), Some("triage-bot"));
    assert_eq!(seen[0].thread_id.as_deref(), Some("t-9"));
    assert!(seen[0].wait_output);
}

#[tokio::test]
async fn agent_call_requires_an_agent_reference() {
    let invoker = Arc::new(FakeInvoker {
        seen: Mutex::new(Vec::new()),
    });
    let node = loomnodes::AgentCallNode::with_invoker(invoker);

    let ctx = context(inputs(&[("input", json!("no agent"))]), RunState::new());
    assert!(matches!(
        node.execute(ctx).await,
        Err(NodeError::MissingInput(_))
    ));
}
