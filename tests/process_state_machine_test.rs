//! Process definitions driven through the runtime

mod common;

use common::*;
use procflow_core::constants::events;
use procflow_core::{DefinitionKind, ProcessDefinition, ReactiveRuntime, RuntimeError, Transition};
use serde_json::json;
use uuid::Uuid;

fn order_process() -> ProcessDefinition {
    ProcessDefinition::new(
        "order",
        ["created", "processing", "completed", "cancelled"],
        "created",
    )
    .with_transition(Transition::new("created", "processing", "START"))
    .with_transition(Transition::new("processing", "completed", "FINISH"))
    .with_transition(Transition::from_any("cancelled", "CANCEL"))
    .with_state_tasks("processing", ["reserve_stock", "charge_card"])
}

#[tokio::test]
async fn test_wildcard_cancel_from_processing() {
    init_test_logging();
    let runtime = ReactiveRuntime::default();
    runtime.register_process(order_process());
    let changes = EventRecorder::attach(runtime.event_bus(), events::PROCESS_STATE_CHANGED);

    let instance = runtime.create_process("order", json!({ "sku": "A-1" })).await.unwrap();
    assert_eq!(instance.state, "created");

    runtime.transition_process(instance.id, "START", None).await.unwrap();
    assert_eq!(runtime.get_process_state(instance.id).await.unwrap(), "processing");

    let cancelled = runtime
        .transition_process(instance.id, "CANCEL", Some(json!({ "reason": "customer request" })))
        .await
        .unwrap();
    assert_eq!(cancelled.state, "cancelled");
    assert_eq!(cancelled.context["sku"], json!("A-1"));
    assert_eq!(cancelled.context["reason"], json!("customer request"));
    assert_eq!(cancelled.history.len(), 2);

    let recorded = changes.of_type(events::PROCESS_STATE_CHANGED);
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[1].payload["previous_state"], json!("processing"));
    assert_eq!(recorded[1].payload["new_state"], json!("cancelled"));
    assert_eq!(recorded[1].payload["instance_id"], json!(instance.id));
}

#[tokio::test]
async fn test_unmatched_event_leaves_instance_unchanged() {
    let runtime = ReactiveRuntime::default();
    runtime.register_process(order_process());
    let changes = EventRecorder::attach(runtime.event_bus(), events::PROCESS_STATE_CHANGED);

    let instance = runtime.create_process("order", json!({})).await.unwrap();
    let same = runtime.transition_process(instance.id, "FINISH", None).await.unwrap();

    assert_eq!(same.state, "created");
    assert!(changes.event_types().is_empty());
}

#[tokio::test]
async fn test_unknown_ids_are_errors() {
    let runtime = ReactiveRuntime::default();
    let err = runtime.create_process("missing", json!({})).await.unwrap_err();
    assert!(matches!(err, RuntimeError::DefinitionNotFound { kind: DefinitionKind::Process, .. }));

    let err = runtime
        .transition_process(Uuid::new_v4(), "START", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InstanceNotFound { kind: DefinitionKind::Process, .. }));
}

#[tokio::test]
async fn test_per_state_tasks_are_only_those_configured() {
    let runtime = ReactiveRuntime::default();
    runtime.register_process(order_process());
    let manager = runtime.process_manager();

    let instance = runtime.create_process("order", json!({})).await.unwrap();
    assert!(manager.tasks_for_current_state(instance.id).await.unwrap().is_empty());

    runtime.transition_process(instance.id, "START", None).await.unwrap();
    assert_eq!(
        manager.tasks_for_current_state(instance.id).await.unwrap(),
        vec!["reserve_stock", "charge_card"]
    );
    assert_eq!(
        manager.available_events(instance.id).await.unwrap(),
        vec!["FINISH", "CANCEL"]
    );
}

#[tokio::test]
async fn test_concurrent_transitions_are_serialized() {
    let runtime = std::sync::Arc::new(ReactiveRuntime::default());
    runtime.register_process(
        ProcessDefinition::new("counter", ["even", "odd"], "even")
            .with_transition(Transition::new("even", "odd", "FLIP"))
            .with_transition(Transition::new("odd", "even", "FLIP")),
    );
    let instance = runtime.create_process("counter", json!({})).await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let runtime = std::sync::Arc::clone(&runtime);
            tokio::spawn(async move { runtime.transition_process(instance.id, "FLIP", None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = runtime.process_manager().get_instance(instance.id).await.unwrap();
    assert_eq!(snapshot.history.len(), 10);
    assert_eq!(snapshot.state, "even");
}
