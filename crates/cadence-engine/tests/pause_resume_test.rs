//! Integration tests for await nodes, resume and expiry.

use std::sync::Arc;

use cadence_engine::{
  Engine, EngineConfig, EngineError, ExecutionStatus, FilterCatalogue, PauseState, TriggerEvent,
};
use cadence_procedure::{InMemoryRegistry, Procedure};
use cadence_workflow::Workflow;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn test_registry() -> Arc<InMemoryRegistry> {
  let registry = InMemoryRegistry::new();
  registry
    .register(Procedure::from_fn("emit", |input, _ctx| async move {
      Ok(input["output"].clone())
    }))
    .unwrap();
  registry
    .register(Procedure::from_fn("finalize", |input, _ctx| async move {
      Ok(json!({ "success": input["approved"] }))
    }))
    .unwrap();
  registry
    .register(Procedure::trigger_fn("approval.trigger", |input, _ctx| async move {
      Ok(input)
    }))
    .unwrap();
  Arc::new(registry)
}

fn engine() -> Engine {
  Engine::new(test_registry())
}

fn approval_workflow() -> Workflow {
  Workflow::from_json(
    &json!({
      "id": "order-approval",
      "name": "Order approval",
      "version": "2.0.0",
      "startNode": "validate",
      "nodes": [
        { "id": "validate", "type": "procedure", "procedureName": "emit",
          "config": { "output": { "validated": true } }, "next": "wait" },
        { "id": "wait", "type": "await", "on": "approval.trigger",
          "filter": { "id": "match-variable", "params": { "field": "orderId" } },
          "timeout": { "duration": "1h" }, "onTimeout": "expired",
          "next": "finalize" },
        { "id": "finalize", "type": "procedure", "procedureName": "finalize" },
        { "id": "expired", "type": "procedure", "procedureName": "emit",
          "config": { "output": { "expired": true } } }
      ]
    })
    .to_string(),
  )
  .unwrap()
}

fn approval(order_id: &str, approved: bool) -> TriggerEvent {
  TriggerEvent::new(
    "approval.trigger",
    json!({ "orderId": order_id, "approved": approved }),
  )
}

async fn pause(engine: &Engine, workflow: &Workflow) -> PauseState {
  let result = engine
    .execute(workflow, json!({ "orderId": "o1" }), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(result.status, ExecutionStatus::Paused);
  result.resume_state.unwrap()
}

#[tokio::test]
async fn test_await_pauses_execution() {
  let engine = engine();
  let workflow = approval_workflow();

  let result = engine
    .execute(&workflow, json!({ "orderId": "o1" }), CancellationToken::new())
    .await
    .unwrap();

  assert!(result.is_paused());
  assert_eq!(result.nodes_executed, vec!["validate", "wait"]);
  assert!(result.error.is_none());

  let state = result.resume_state.unwrap();
  assert_eq!(state.paused_at, "wait");
  assert_eq!(state.execution_id, result.execution_id);
  assert_eq!(state.workflow_id, "order-approval");
  assert_eq!(state.workflow_version, "2.0.0");
  assert_eq!(state.waiting_for.procedures, vec!["approval.trigger"]);
  assert_eq!(state.variables["orderId"], json!("o1"));
  assert_eq!(state.variables["validated"], json!(true));
  assert_eq!(state.on_timeout_node.as_deref(), Some("expired"));

  let timeout_at = state.timeout_at.unwrap();
  let remaining = timeout_at - state.paused_at_time;
  assert!(remaining > Duration::minutes(59) && remaining <= Duration::hours(1));
}

#[tokio::test]
async fn test_resume_completes_execution() {
  let engine = engine();
  let workflow = approval_workflow();
  let state = pause(&engine, &workflow).await;
  let execution_id = state.execution_id.clone();

  let result = engine
    .resume(&workflow, state, approval("o1", true), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.execution_id, execution_id);
  assert_eq!(result.outputs["success"], json!(true));
  assert_eq!(result.outputs["approved"], json!(true));
  assert_eq!(
    result.node_outputs["wait"],
    json!({ "orderId": "o1", "approved": true })
  );
  assert_eq!(result.nodes_executed, vec!["validate", "wait", "finalize"]);
  assert!(result.resume_state.is_none());
}

#[tokio::test]
async fn test_pause_state_is_single_use() {
  let engine = engine();
  let workflow = approval_workflow();
  let state = pause(&engine, &workflow).await;
  let pause_id = state.pause_id.clone();

  engine
    .resume(&workflow, state.clone(), approval("o1", true), CancellationToken::new())
    .await
    .unwrap();
  assert!(engine.is_consumed(&pause_id));

  let err = engine
    .resume(&workflow, state.clone(), approval("o1", false), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::PauseStateConsumed { pause_id: ref id } if *id == pause_id));

  let err = engine
    .expire(&workflow, state, Utc::now() + Duration::hours(2), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::PauseStateConsumed { .. }));
}

fn engine_with_retention(retention: std::time::Duration) -> Engine {
  Engine::builder(test_registry())
    .config(EngineConfig {
      pause_retention: retention,
      ..EngineConfig::default()
    })
    .build()
}

#[tokio::test]
async fn test_consumed_ledger_forgets_states_past_retention() {
  let engine = engine_with_retention(std::time::Duration::from_millis(200));
  let workflow = approval_workflow();

  let first = pause(&engine, &workflow).await;
  engine
    .resume(&workflow, first.clone(), approval("o1", true), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(engine.consumed_count(), 1);

  tokio::time::sleep(std::time::Duration::from_millis(300)).await;

  let second = pause(&engine, &workflow).await;
  engine
    .resume(&workflow, second, approval("o1", true), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(engine.consumed_count(), 1);
  assert!(!engine.is_consumed(&first.pause_id));

  // Forgotten by the ledger, but still refused.
  let err = engine
    .resume(&workflow, first, approval("o1", true), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::StalePauseState { .. }));
}

#[tokio::test]
async fn test_state_older_than_retention_rejected() {
  let engine = engine_with_retention(std::time::Duration::from_secs(60));
  let workflow = approval_workflow();
  let mut state = pause(&engine, &workflow).await;
  state.paused_at_time = Utc::now() - Duration::minutes(5);
  let pause_id = state.pause_id.clone();

  let err = engine
    .resume(&workflow, state.clone(), approval("o1", true), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::StalePauseState { pause_id: ref id } if *id == pause_id));

  let err = engine
    .expire(&workflow, state, Utc::now() + Duration::hours(2), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::StalePauseState { .. }));
  assert_eq!(engine.consumed_count(), 0);
}

#[tokio::test]
async fn test_rejected_events_do_not_consume_state() {
  let engine = engine();
  let workflow = approval_workflow();
  let state = pause(&engine, &workflow).await;

  let err = engine
    .resume(
      &workflow,
      state.clone(),
      TriggerEvent::new("payment.trigger", json!({ "orderId": "o1" })),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    EngineError::TriggerNotAwaited { ref trigger, .. } if trigger == "payment.trigger"
  ));

  let err = engine
    .resume(&workflow, state.clone(), approval("o2", true), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    EngineError::FilterRejected { ref filter_id, .. } if filter_id == "match-variable"
  ));
  assert!(!engine.is_consumed(&state.pause_id));

  let result = engine
    .resume(&workflow, state, approval("o1", true), CancellationToken::new())
    .await
    .unwrap();
  assert!(result.is_completed());
}

#[tokio::test]
async fn test_persisted_state_resumes_on_fresh_engine() {
  let workflow = approval_workflow();
  let state = pause(&engine(), &workflow).await;

  let persisted = serde_json::to_string_pretty(&state).unwrap();
  let restored: PauseState = serde_json::from_str(&persisted).unwrap();
  assert_eq!(restored, state);

  let result = engine()
    .resume(&workflow, restored, approval("o1", true), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(result.outputs["success"], json!(true));
  assert_eq!(result.nodes_executed, vec!["validate", "wait", "finalize"]);
}

#[tokio::test]
async fn test_multiple_awaits_pause_twice() {
  let workflow = Workflow::from_json(
    &json!({
      "id": "two-step",
      "name": "Two step approval",
      "startNode": "manager",
      "nodes": [
        { "id": "manager", "type": "await", "procedureName": "approval.trigger", "next": "finance" },
        { "id": "finance", "type": "await", "on": ["finance.trigger", "approval.trigger"],
          "next": "finalize" },
        { "id": "finalize", "type": "procedure", "procedureName": "finalize" }
      ]
    })
    .to_string(),
  )
  .unwrap();
  let engine = engine();

  let first = engine
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();
  let first_state = first.resume_state.unwrap();
  assert_eq!(first_state.paused_at, "manager");

  let second = engine
    .resume(
      &workflow,
      first_state.clone(),
      TriggerEvent::new("approval.trigger", json!({ "manager": "ok" })),
      CancellationToken::new(),
    )
    .await
    .unwrap();
  assert!(second.is_paused());
  let second_state = second.resume_state.unwrap();
  assert_eq!(second_state.paused_at, "finance");
  assert_ne!(second_state.pause_id, first_state.pause_id);
  assert_eq!(second_state.execution_id, first_state.execution_id);
  assert_eq!(
    second_state.waiting_for.procedures,
    vec!["finance.trigger", "approval.trigger"]
  );

  let done = engine
    .resume(
      &workflow,
      second_state,
      TriggerEvent::new("finance.trigger", json!({ "approved": true })),
      CancellationToken::new(),
    )
    .await
    .unwrap();
  assert!(done.is_completed());
  assert_eq!(done.outputs["manager"], json!("ok"));
  assert_eq!(done.outputs["success"], json!(true));
  assert_eq!(done.nodes_executed, vec!["manager", "finance", "finalize"]);
}

#[tokio::test]
async fn test_expire_routes_to_on_timeout() {
  let engine = engine();
  let workflow = approval_workflow();
  let state = pause(&engine, &workflow).await;

  let err = engine
    .expire(&workflow, state.clone(), Utc::now(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::NotExpired { .. }));
  assert!(!engine.is_consumed(&state.pause_id));

  let result = engine
    .expire(&workflow, state, Utc::now() + Duration::hours(2), CancellationToken::new())
    .await
    .unwrap();

  assert!(result.is_completed());
  assert_eq!(result.outputs["expired"], json!(true));
  assert_eq!(result.outputs["error"]["name"], json!("TimeoutError"));
  assert_eq!(result.outputs["error"]["nodeId"], json!("wait"));
  assert_eq!(result.nodes_executed, vec!["validate", "wait", "expired"]);
}

#[tokio::test]
async fn test_expire_without_on_timeout_fails() {
  let workflow = Workflow::from_json(
    &json!({
      "id": "strict",
      "name": "Strict",
      "startNode": "wait",
      "nodes": [
        { "id": "wait", "type": "await", "on": "approval.trigger",
          "timeout": { "duration": 60000 }, "next": "finalize" },
        { "id": "finalize", "type": "procedure", "procedureName": "finalize" }
      ]
    })
    .to_string(),
  )
  .unwrap();
  let engine = engine();

  let state = engine
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap()
    .resume_state
    .unwrap();

  let result = engine
    .expire(&workflow, state, Utc::now() + Duration::minutes(5), CancellationToken::new())
    .await
    .unwrap();

  assert!(result.is_failed());
  let error = result.error.unwrap();
  assert_eq!(error.name, "TimeoutError");
  assert_eq!(error.node_id.as_deref(), Some("wait"));
}

#[tokio::test]
async fn test_resume_after_timeout_rejected() {
  let engine = engine();
  let workflow = approval_workflow();
  let mut state = pause(&engine, &workflow).await;
  state.timeout_at = Some(Utc::now() - Duration::seconds(1));

  let err = engine
    .resume(&workflow, state.clone(), approval("o1", true), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::Timeout { ref node_id } if node_id == "wait"));
  assert!(!engine.is_consumed(&state.pause_id));
}

#[tokio::test]
async fn test_resume_with_other_workflow_rejected() {
  let engine = engine();
  let workflow = approval_workflow();
  let state = pause(&engine, &workflow).await;

  let other = Workflow::from_json(
    &json!({
      "id": "other",
      "name": "Other",
      "startNode": "wait",
      "nodes": [{ "id": "wait", "type": "await", "on": "approval.trigger" }]
    })
    .to_string(),
  )
  .unwrap();

  let err = engine
    .resume(&other, state, approval("o1", true), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    EngineError::WorkflowMismatch { ref expected, ref actual }
      if expected == "other" && actual == "order-approval"
  ));
}

#[tokio::test]
async fn test_resume_at_non_await_node_rejected() {
  let engine = engine();
  let workflow = approval_workflow();
  let mut state = pause(&engine, &workflow).await;
  state.paused_at = "validate".to_string();

  let err = engine
    .resume(&workflow, state, approval("o1", true), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::UnknownPauseNode { ref node_id } if node_id == "validate"));
}

#[tokio::test]
async fn test_custom_filter() {
  let filters = FilterCatalogue::new();
  filters.register("amount-at-least", |event, _state, params| {
    let minimum = params["minimum"].as_f64().ok_or("params.minimum must be a number")?;
    Ok(event["amount"].as_f64().is_some_and(|amount| amount >= minimum))
  });
  let engine = Engine::builder(test_registry())
    .filters(Arc::new(filters))
    .build();

  let workflow = Workflow::from_json(
    &json!({
      "id": "big-payments",
      "name": "Big payments",
      "startNode": "wait",
      "nodes": [
        { "id": "wait", "type": "await", "on": "payment.trigger",
          "filter": { "id": "amount-at-least", "params": { "minimum": 1000 } } }
      ]
    })
    .to_string(),
  )
  .unwrap();

  let state = engine
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap()
    .resume_state
    .unwrap();

  let small = TriggerEvent::new("payment.trigger", json!({ "amount": 10 }));
  let err = engine
    .resume(&workflow, state.clone(), small, CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::FilterRejected { .. }));

  let big = TriggerEvent::new("payment.trigger", json!({ "amount": 5000 }));
  let result = engine
    .resume(&workflow, state, big, CancellationToken::new())
    .await
    .unwrap();
  assert!(result.is_completed());
  assert_eq!(result.outputs["amount"], json!(5000));
}

#[tokio::test]
async fn test_expression_filter() {
  let workflow = Workflow::from_json(
    &json!({
      "id": "threshold",
      "name": "Threshold",
      "startNode": "wait",
      "variables": { "limit": 3 },
      "nodes": [
        { "id": "wait", "type": "await", "on": "reading.trigger",
          "filter": { "id": "expression", "params": { "expression": "event.value > variables.limit" } } }
      ]
    })
    .to_string(),
  )
  .unwrap();
  let engine = engine();

  let state = engine
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap()
    .resume_state
    .unwrap();

  let low = TriggerEvent::new("reading.trigger", json!({ "value": 2 }));
  assert!(
    engine
      .resume(&workflow, state.clone(), low, CancellationToken::new())
      .await
      .is_err()
  );

  let high = TriggerEvent::new("reading.trigger", json!({ "value": 9 }));
  let result = engine
    .resume(&workflow, state, high, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(result.outputs["value"], json!(9));
}
