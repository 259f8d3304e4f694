//! Integration tests for Engine::execute.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_engine::{
  ChannelNotifier, Engine, EngineConfig, EngineError, ExecutionEvent, ExecutionStatus, Span,
  Tracer, TracingTracer,
};
use cadence_composition::{CompositionConfig, CompositionType, composition_procedure};
use cadence_procedure::{HandlerError, InMemoryRegistry, Procedure, ProcedureRegistry};
use cadence_workflow::{Workflow, WorkflowDefinition};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn number(input: &serde_json::Value, key: &str) -> f64 {
  input[key].as_f64().unwrap_or_default()
}

fn test_registry() -> Arc<InMemoryRegistry> {
  let registry = InMemoryRegistry::new();

  registry
    .register(Procedure::from_fn("math.add", |input, _ctx| async move {
      Ok(json!({ "result": number(&input, "a") + number(&input, "b") }))
    }))
    .unwrap();
  registry
    .register(Procedure::from_fn("math.multiply", |input, _ctx| async move {
      Ok(json!({ "result": number(&input, "result") * number(&input, "factor") }))
    }))
    .unwrap();
  registry
    .register(Procedure::from_fn("math.subtract", |input, _ctx| async move {
      Ok(json!({ "result": number(&input, "result") - number(&input, "amount") }))
    }))
    .unwrap();
  // Returns its `output` config verbatim.
  registry
    .register(Procedure::from_fn("emit", |input, _ctx| async move {
      Ok(input["output"].clone())
    }))
    .unwrap();
  registry
    .register(Procedure::from_fn("fail", |input, _ctx| async move {
      let message = input["message"].as_str().unwrap_or("boom").to_string();
      let name = input["errorName"].as_str().unwrap_or("HandlerError").to_string();
      Err(HandlerError::new(message).with_name(name))
    }))
    .unwrap();
  registry
    .register(Procedure::from_fn("slow", |_input, ctx| async move {
      tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(json!({"winner": "slow"})),
        _ = ctx.cancel.cancelled() => Err(HandlerError::new("cancelled")),
      }
    }))
    .unwrap();
  registry
    .register(Procedure::from_fn("fast", |_input, _ctx| async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      Ok(json!({"winner": "fast"}))
    }))
    .unwrap();

  Arc::new(registry)
}

fn workflow(definition: serde_json::Value) -> Workflow {
  let definition: WorkflowDefinition = serde_json::from_value(definition).unwrap();
  Workflow::new(definition).unwrap()
}

fn chain_workflow() -> Workflow {
  workflow(json!({
    "id": "calc",
    "name": "Calculator",
    "startNode": "add",
    "nodes": [
      { "id": "add", "type": "procedure", "procedureName": "math.add",
        "config": { "a": 10, "b": 5 }, "next": "multiply" },
      { "id": "multiply", "type": "procedure", "procedureName": "math.multiply",
        "config": { "factor": 2 }, "next": "subtract" },
      { "id": "subtract", "type": "procedure", "procedureName": "math.subtract",
        "config": { "amount": 100 } }
    ]
  }))
}

fn parallel_workflow(error_handling: &str, middle: serde_json::Value) -> Workflow {
  workflow(json!({
    "id": "fanout",
    "name": "Fan out",
    "startNode": "fan",
    "nodes": [
      { "id": "fan", "type": "parallel", "branches": ["a", "b", "c"],
        "parallel": { "waitForAll": true, "maxConcurrency": 2 },
        "errorHandling": error_handling },
      { "id": "a", "type": "procedure", "procedureName": "emit", "config": { "output": { "a": 1 } } },
      middle,
      { "id": "c", "type": "procedure", "procedureName": "emit", "config": { "output": { "c": 3 } } }
    ]
  }))
}

fn engine() -> Engine {
  Engine::new(test_registry())
}

#[tokio::test]
async fn test_sequential_chain() {
  let result = engine()
    .execute(&chain_workflow(), json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.outputs["result"], json!(-70.0));
  assert_eq!(result.nodes_executed, vec!["add", "multiply", "subtract"]);
  assert_eq!(result.node_outputs["add"], json!({"result": 15.0}));
  assert!(result.resume_state.is_none());
  assert!(result.error.is_none());
}

#[tokio::test]
async fn test_workflow_without_await_never_pauses() {
  let engine = engine();
  let workflows = vec![
    chain_workflow(),
    parallel_workflow(
      "continue",
      json!({ "id": "b", "type": "procedure", "procedureName": "fail" }),
    ),
    workflow(json!({
      "id": "branchy",
      "name": "Branchy",
      "startNode": "check",
      "nodes": [
        { "id": "check", "type": "condition", "condition": "amount > 10",
          "trueBranch": "route", "falseBranch": "group" },
        { "id": "route", "type": "switch", "selector": "region",
          "cases": { "eu": "group" }, "default": "group" },
        { "id": "group", "type": "sequential", "procedures": ["math.add", "math.multiply"] }
      ]
    })),
  ];

  for workflow in &workflows {
    for input in [json!({}), json!({"amount": 50, "region": "eu"}), json!({"amount": 1})] {
      let result = engine
        .execute(workflow, input, CancellationToken::new())
        .await
        .unwrap();
      assert_ne!(result.status, ExecutionStatus::Paused, "{}", workflow.id());
      assert!(result.resume_state.is_none());
    }
  }
}

#[tokio::test]
async fn test_condition_routes_on_variables() {
  let workflow = workflow(json!({
    "id": "sizer",
    "name": "Sizer",
    "startNode": "check",
    "variables": { "threshold": 100 },
    "nodes": [
      { "id": "check", "type": "condition", "condition": "amount > threshold",
        "trueBranch": "big", "falseBranch": "small" },
      { "id": "big", "type": "procedure", "procedureName": "emit",
        "config": { "output": { "size": "big" } } },
      { "id": "small", "type": "procedure", "procedureName": "emit",
        "config": { "output": { "size": "small" } } }
    ]
  }));
  let engine = engine();

  let big = engine
    .execute(&workflow, json!({"amount": 250}), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(big.outputs["size"], json!("big"));
  assert_eq!(big.node_outputs["check"], json!(true));

  let small = engine
    .execute(&workflow, json!({"amount": 5}), CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(small.outputs["size"], json!("small"));
  assert_eq!(small.nodes_executed, vec!["check", "small"]);
}

#[tokio::test]
async fn test_switch_with_inline_case_and_default() {
  let workflow = workflow(json!({
    "id": "shipping",
    "name": "Shipping",
    "startNode": "route",
    "nodes": [
      { "id": "route", "type": "switch", "selector": "region",
        "cases": {
          "eu": "ship-eu",
          "us": { "id": "ship-us", "type": "procedure", "procedureName": "emit",
                  "config": { "output": { "carrier": "us-post" } } }
        },
        "default": "ship-default" },
      { "id": "ship-eu", "type": "procedure", "procedureName": "emit",
        "config": { "output": { "carrier": "eu-post" } } },
      { "id": "ship-default", "type": "procedure", "procedureName": "emit",
        "config": { "output": { "carrier": "courier" } } }
    ]
  }));
  let engine = engine();

  for (region, carrier, node) in [
    ("us", "us-post", "ship-us"),
    ("eu", "eu-post", "ship-eu"),
    ("jp", "courier", "ship-default"),
  ] {
    let result = engine
      .execute(&workflow, json!({"region": region}), CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(result.outputs["carrier"], json!(carrier));
    assert_eq!(result.nodes_executed, vec!["route", node]);
  }
}

#[tokio::test]
async fn test_parallel_merges_all_branches() {
  let workflow = parallel_workflow(
    "stop",
    json!({ "id": "b", "type": "procedure", "procedureName": "emit", "config": { "output": { "b": 2 } } }),
  );

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.node_outputs["fan"], json!({"a": 1, "b": 2, "c": 3}));
  assert_eq!(result.outputs["a"], json!(1));
  assert_eq!(result.outputs["b"], json!(2));
  assert_eq!(result.outputs["c"], json!(3));
  assert_eq!(result.nodes_executed.len(), 4);
  assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_parallel_continue_records_failed_branch() {
  let workflow = parallel_workflow(
    "continue",
    json!({ "id": "b", "type": "procedure", "procedureName": "fail", "config": { "message": "b broke" } }),
  );

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.node_outputs["fan"], json!({"a": 1, "c": 3}));
  assert!(!result.outputs.contains_key("b"));
  assert_eq!(result.errors.len(), 1);
  assert_eq!(result.errors[0].step, "b");
  assert_eq!(result.errors[0].error, "b broke");
}

#[tokio::test]
async fn test_parallel_stop_fails_node() {
  let workflow = parallel_workflow(
    "stop",
    json!({ "id": "b", "type": "procedure", "procedureName": "fail" }),
  );

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Failed);
  let error = result.error.unwrap();
  assert_eq!(error.name, "HandlerError");
  assert_eq!(error.node_id.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_parallel_race_cancels_losers() {
  let workflow = workflow(json!({
    "id": "race",
    "name": "Race",
    "startNode": "fan",
    "nodes": [
      { "id": "fan", "type": "parallel", "branches": ["slow", "fast"],
        "parallel": { "waitForAll": false } },
      { "id": "slow", "type": "procedure", "procedureName": "slow" },
      { "id": "fast", "type": "procedure", "procedureName": "fast" }
    ]
  }));

  let started = std::time::Instant::now();
  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.outputs["winner"], json!("fast"));
  assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_parallel_namespaced_merge() {
  let workflow = workflow(json!({
    "id": "ns",
    "name": "Namespaced",
    "startNode": "fan",
    "nodes": [
      { "id": "fan", "type": "parallel", "branches": ["left", "right"], "merge": "namespaced",
        "next": "after" },
      { "id": "left", "type": "procedure", "procedureName": "emit", "config": { "output": { "value": 1 } } },
      { "id": "right", "type": "procedure", "procedureName": "emit", "config": { "output": { "value": 2 } } },
      { "id": "after", "type": "procedure", "procedureName": "emit", "config": { "output": { "done": true } } }
    ]
  }));

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.outputs["left"], json!({"value": 1}));
  assert_eq!(result.outputs["right"], json!({"value": 2}));
  assert!(!result.outputs.contains_key("value"));
  assert_eq!(result.outputs["done"], json!(true));
}

#[tokio::test]
async fn test_await_inside_parallel_branch_fails() {
  let workflow = workflow(json!({
    "id": "bad-fan",
    "name": "Bad fan",
    "startNode": "fan",
    "nodes": [
      { "id": "fan", "type": "parallel", "branches": ["wait"] },
      { "id": "wait", "type": "await", "on": "approval.trigger" }
    ]
  }));

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Failed);
  assert!(result.resume_state.is_none());
}

#[tokio::test]
async fn test_sequential_node_retries() {
  let attempts = Arc::new(AtomicU32::new(0));
  let registry = InMemoryRegistry::new();
  let counter = attempts.clone();
  registry
    .register(Procedure::from_fn("flaky", move |_input, _ctx| {
      let counter = counter.clone();
      async move {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= 2 {
          Err(HandlerError::new(format!("attempt {attempt} failed")))
        } else {
          Ok(json!({"charged": true}))
        }
      }
    }))
    .unwrap();

  let workflow = workflow(json!({
    "id": "charge",
    "name": "Charge",
    "startNode": "charge",
    "nodes": [
      { "id": "charge", "type": "sequential", "procedures": ["flaky"],
        "errorHandling": "retry",
        "retryConfig": { "maxAttempts": 3, "delayMs": 5, "backoffMultiplier": 2 } }
    ]
  }));

  let result = Engine::new(Arc::new(registry))
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.outputs["charged"], json!(true));
  assert_eq!(result.errors.len(), 2);
  assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_on_error_routes_failure() {
  let workflow = workflow(json!({
    "id": "payments",
    "name": "Payments",
    "startNode": "charge",
    "nodes": [
      { "id": "charge", "type": "procedure", "procedureName": "fail",
        "config": { "message": "card declined", "errorName": "PaymentError" },
        "next": "ship", "onError": "recover" },
      { "id": "ship", "type": "procedure", "procedureName": "emit",
        "config": { "output": { "shipped": true } } },
      { "id": "recover", "type": "procedure", "procedureName": "emit",
        "config": { "output": { "recovered": true } } }
    ]
  }));

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.nodes_executed, vec!["charge", "recover"]);
  assert_eq!(result.outputs["error"]["name"], json!("PaymentError"));
  assert_eq!(result.outputs["error"]["message"], json!("card declined"));
  assert_eq!(result.outputs["error"]["nodeId"], json!("charge"));
  assert_eq!(result.outputs["recovered"], json!(true));
  assert!(!result.outputs.contains_key("shipped"));
}

#[tokio::test]
async fn test_unrouted_failure_fails_execution() {
  let workflow = workflow(json!({
    "id": "payments",
    "name": "Payments",
    "startNode": "charge",
    "nodes": [
      { "id": "charge", "type": "procedure", "procedureName": "fail", "next": "ship" },
      { "id": "ship", "type": "procedure", "procedureName": "emit" }
    ]
  }));

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Failed);
  let error = result.error.unwrap();
  assert_eq!(error.name, "HandlerError");
  assert_eq!(error.message, "boom");
  assert_eq!(error.node_id.as_deref(), Some("charge"));
  assert_eq!(result.nodes_executed, vec!["charge"]);
}

#[tokio::test]
async fn test_missing_procedure_fails_execution() {
  let workflow = workflow(json!({
    "id": "ghost",
    "name": "Ghost",
    "startNode": "call",
    "nodes": [{ "id": "call", "type": "procedure", "procedureName": "does.not.exist" }]
  }));

  let result = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Failed);
  assert_eq!(result.error.unwrap().name, "ProcedureNotFound");
}

#[tokio::test]
async fn test_cancelled_execution() {
  let cancel = CancellationToken::new();
  cancel.cancel();

  let result = engine()
    .execute(&chain_workflow(), json!({}), cancel)
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Cancelled);
  assert!(result.nodes_executed.is_empty());
}

#[tokio::test]
async fn test_step_limit_stops_cycles() {
  let workflow = workflow(json!({
    "id": "forever",
    "name": "Forever",
    "startNode": "loop",
    "nodes": [
      { "id": "loop", "type": "condition", "condition": "true", "trueBranch": "tick" },
      { "id": "tick", "type": "procedure", "procedureName": "emit",
        "config": { "output": {} }, "next": "loop" }
    ]
  }));

  let engine = Engine::builder(test_registry())
    .config(EngineConfig {
      max_steps: 20,
      ..EngineConfig::default()
    })
    .build();

  let result = engine
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Failed);
  assert_eq!(result.error.unwrap().name, "StepLimitExceeded");
  assert_eq!(result.nodes_executed.len(), 20);
}

#[tokio::test]
async fn test_invalid_definition_rejected() {
  let definition: WorkflowDefinition = serde_json::from_value(json!({
    "id": "broken",
    "name": "Broken",
    "startNode": "a",
    "nodes": [{ "id": "a", "type": "procedure", "procedureName": "emit", "next": "ghost" }]
  }))
  .unwrap();

  let err = engine()
    .execute_definition(definition, json!({}), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_unknown_filter_rejected_before_run() {
  let workflow = workflow(json!({
    "id": "filtered",
    "name": "Filtered",
    "startNode": "wait",
    "nodes": [{ "id": "wait", "type": "await", "on": "approval.trigger",
                "filter": { "id": "no-such-filter" } }]
  }));

  let err = engine()
    .execute(&workflow, json!({}), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::UnknownFilter { ref filter_id, .. } if filter_id == "no-such-filter"));
}

#[tokio::test]
async fn test_notifier_receives_lifecycle_events() {
  let (notifier, mut rx) = ChannelNotifier::channel();
  let engine = Engine::builder(test_registry()).notifier(notifier).build();

  let result = engine
    .execute(&chain_workflow(), json!({}), CancellationToken::new())
    .await
    .unwrap();

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(
    events.first(),
    Some(ExecutionEvent::WorkflowStarted { workflow_id, .. }) if workflow_id == "calc"
  ));
  assert_eq!(
    events.last(),
    Some(&ExecutionEvent::WorkflowCompleted {
      execution_id: result.execution_id.clone()
    })
  );
  let completed = events
    .iter()
    .filter(|e| matches!(e, ExecutionEvent::NodeCompleted { .. }))
    .count();
  assert_eq!(completed, 3);
}

#[derive(Clone, Default)]
struct RecordingTracer {
  spans: Arc<Mutex<Vec<String>>>,
}

struct RecordingSpan {
  name: String,
  spans: Arc<Mutex<Vec<String>>>,
}

impl Span for RecordingSpan {
  fn set_attributes(&mut self, _attributes: serde_json::Value) {}

  fn record_exception(&mut self, error: &str) {
    self.spans.lock().unwrap().push(format!("{}!{}", self.name, error));
  }

  fn end(self: Box<Self>) {
    self.spans.lock().unwrap().push(self.name.clone());
  }
}

impl Tracer for RecordingTracer {
  fn start_span(&self, name: &str, _attributes: serde_json::Value) -> Box<dyn Span> {
    Box::new(RecordingSpan {
      name: name.to_string(),
      spans: self.spans.clone(),
    })
  }
}

#[tokio::test]
async fn test_tracer_spans_per_node() {
  let tracer = RecordingTracer::default();
  let engine = Engine::builder(test_registry())
    .tracer(tracer.clone())
    .build();

  engine
    .execute(&chain_workflow(), json!({}), CancellationToken::new())
    .await
    .unwrap();

  let spans = tracer.spans.lock().unwrap().clone();
  assert_eq!(
    spans,
    vec![
      "workflow.node",
      "workflow.node",
      "workflow.node",
      "workflow.execute"
    ]
  );
}

#[tokio::test]
async fn test_tracing_tracer_runs() {
  let engine = Engine::builder(test_registry())
    .tracer(TracingTracer)
    .build();

  let result = engine
    .execute(&chain_workflow(), json!({}), CancellationToken::new())
    .await
    .unwrap();
  assert!(result.is_completed());
}

#[tokio::test]
async fn test_composition_procedure_as_workflow_node() {
  let registry = test_registry();
  let shared: Arc<dyn ProcedureRegistry> = registry.clone();
  registry
    .register(composition_procedure(
      CompositionConfig::new("calc.add", CompositionType::Sequential, &["math.add"]),
      shared,
    ))
    .unwrap();

  let definition = workflow(json!({
    "id": "composed",
    "name": "Composed",
    "startNode": "add",
    "nodes": [
      { "id": "add", "type": "procedure", "procedureName": "calc.add",
        "config": { "a": 1, "b": 2 }, "next": "double" },
      { "id": "double", "type": "procedure", "procedureName": "math.multiply",
        "config": { "factor": 2 } }
    ]
  }));

  let result = Engine::new(registry)
    .execute(&definition, json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Completed);
  assert_eq!(result.node_outputs["add"], json!({"result": 3.0}));
  assert_eq!(result.outputs["result"], json!(6.0));
  for key in ["stepsExecuted", "stepResults", "errors"] {
    assert!(result.node_outputs["add"].get(key).is_none(), "{key} leaked into node output");
  }
}
