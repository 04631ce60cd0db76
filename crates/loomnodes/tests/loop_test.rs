//! End-to-end loop scenarios over the built-in node library.

use loomcore::{LinkKind, StepStatus, TriggerMessage, WorkflowAction, WorkflowConfig};
use loomruntime::{LoomRuntime, NodeRegistry, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;

fn runtime() -> LoomRuntime {
    let mut registry = NodeRegistry::new();
    loomnodes::register_builtin(&mut registry);
    LoomRuntime::with_config(Arc::new(registry), RuntimeConfig::default())
}

#[tokio::test(flavor = "multi_thread")]
async fn bounded_loop_over_builtin_nodes() {
    let runtime = runtime();

    let mut config = WorkflowConfig::new("notify-each");
    config.add_action(WorkflowAction::new("start", "trigger.manual"));
    config.add_action(
        WorkflowAction::new("each", "loop.items")
            .with_input("items", "$start")
            .with_times(3),
    );
    config.add_action(
        WorkflowAction::new("note", "log.message").with_input("item", "$current"),
    );
    config.add_action(WorkflowAction::new("end", "log.message"));
    config.relate("start", "each", LinkKind::Data);
    config.relate("each", "note", LinkKind::Loop);
    config.relate("each", "end", LinkKind::Done);
    let id = runtime.register_workflow(config).await;

    let trigger = TriggerMessage::manual(id, json!([10, 20, 30, 40, 50]));
    let receipt = runtime.send_event(id, trigger, true).await.unwrap();

    assert_eq!(
        receipt.output,
        Some(json!({"iterations": 3, "current": 2, "eof": false}))
    );

    let steps = runtime
        .mediator()
        .get_event_trace(receipt.event_id, true)
        .await
        .unwrap();

    let notes: Vec<&serde_json::Value> = steps
        .iter()
        .filter(|s| s.action_id == "note")
        .map(|s| &s.output)
        .collect();
    assert_eq!(
        notes,
        vec![
            &json!({"item": 10}),
            &json!({"item": 20}),
            &json!({"item": 30}),
        ]
    );
    assert!(steps.iter().all(|s| s.status == StepStatus::Succeeded));
}

#[tokio::test(flavor = "multi_thread")]
async fn unbounded_loop_consumes_the_source() {
    let runtime = runtime();

    let mut config = WorkflowConfig::new("drain");
    config.add_action(WorkflowAction::new("start", "trigger.manual"));
    config.add_action(WorkflowAction::new("each", "loop.items").with_input("items", "$start"));
    config.add_action(
        WorkflowAction::new("note", "log.message").with_input("item", "$current"),
    );
    config.relate("start", "each", LinkKind::Data);
    config.relate("each", "note", LinkKind::Loop);
    let id = runtime.register_workflow(config).await;

    let trigger = TriggerMessage::manual(id, json!(["a", "b", "c"]));
    let receipt = runtime.send_event(id, trigger, true).await.unwrap();

    assert_eq!(
        receipt.output,
        Some(json!({"iterations": 3, "current": 3, "eof": true}))
    );

    let steps = runtime
        .mediator()
        .get_event_trace(receipt.event_id, false)
        .await
        .unwrap();
    assert_eq!(
        steps.iter().filter(|s| s.action_id == "note").count(),
        3
    );
}

/// Pipeline mixing the template transform with a loop body that reads
/// the cursor through `$current`.
#[tokio::test(flavor = "multi_thread")]
async fn template_reads_loop_cursor() {
    let runtime = runtime();

    let mut config = WorkflowConfig::new("greet-each");
    config.add_action(WorkflowAction::new("start", "trigger.manual"));
    config.add_action(WorkflowAction::new("each", "loop.items").with_input("items", "$start"));
    config.add_action(
        WorkflowAction::new("greet", "transform.template")
            .with_input("template", "hello {{current.name}}"),
    );
    config.relate("start", "each", LinkKind::Data);
    config.relate("each", "greet", LinkKind::Loop);
    let id = runtime.register_workflow(config).await;

    let trigger = TriggerMessage::manual(id, json!([{"name": "ada"}, {"name": "linus"}]));
    let receipt = runtime.send_event(id, trigger, true).await.unwrap();

    let steps = runtime
        .mediator()
        .get_event_trace(receipt.event_id, true)
        .await
        .unwrap();
    let greetings: Vec<&serde_json::Value> = steps
        .iter()
        .filter(|s| s.action_id == "greet")
        .map(|s| &s.output)
        .collect();
    assert_eq!(greetings, vec![&json!("hello ada"), &json!("hello linus")]);
}
