//! Per-run mutable state.

use std::time::Instant;

use cadence_composition::StepError;
use cadence_workflow::{Scope, Workflow};
use chrono::{DateTime, Utc};

use crate::pause::PauseState;

/// State owned by exactly one execution.
///
/// Created per `execute`, restored from a [`PauseState`] on resume. Parallel
/// branches work on a [`ExecutionContext::branch`] copy and are folded back at
/// the join point, so no two branches write the same map.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
  pub workflow_id: String,
  pub execution_id: String,
  pub variables: Scope,
  pub node_outputs: serde_json::Map<String, serde_json::Value>,
  pub nodes_executed: Vec<String>,
  pub errors: Vec<StepError>,
  pub start_time: DateTime<Utc>,
  started: Instant,
}

impl ExecutionContext {
  /// Fresh context: workflow variables overlaid by the input.
  ///
  /// Object inputs are merged key by key; any other input is stored as
  /// `variables.input`.
  pub fn new(workflow: &Workflow, input: serde_json::Value) -> Self {
    let mut variables = workflow.variables().clone();
    match input {
      serde_json::Value::Object(map) => variables.extend(map),
      serde_json::Value::Null => {}
      other => {
        variables.insert("input".to_string(), other);
      }
    }

    Self {
      workflow_id: workflow.id().to_string(),
      execution_id: uuid::Uuid::new_v4().to_string(),
      variables,
      node_outputs: serde_json::Map::new(),
      nodes_executed: Vec::new(),
      errors: Vec::new(),
      start_time: Utc::now(),
      started: Instant::now(),
    }
  }

  /// Rebuild the context of a paused execution.
  pub fn restore(pause_state: &PauseState) -> Self {
    Self {
      workflow_id: pause_state.workflow_id.clone(),
      execution_id: pause_state.execution_id.clone(),
      variables: pause_state.variables.clone(),
      node_outputs: pause_state.node_outputs.clone(),
      nodes_executed: pause_state.nodes_executed.clone(),
      errors: pause_state.errors.clone(),
      start_time: Utc::now(),
      started: Instant::now(),
    }
  }

  /// A context for one parallel branch: current variables, empty history.
  pub fn branch(&self) -> Self {
    Self {
      workflow_id: self.workflow_id.clone(),
      execution_id: self.execution_id.clone(),
      variables: self.variables.clone(),
      node_outputs: serde_json::Map::new(),
      nodes_executed: Vec::new(),
      errors: Vec::new(),
      start_time: self.start_time,
      started: self.started,
    }
  }

  /// Store a node's output and merge object keys into the variables.
  pub fn record_output(&mut self, node_id: &str, output: serde_json::Value) {
    self.merge_variables(&output);
    self.node_outputs.insert(node_id.to_string(), output);
  }

  /// Merge object keys into the variables; later writes win.
  pub fn merge_variables(&mut self, value: &serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
      for (key, value) in map {
        self.variables.insert(key.clone(), value.clone());
      }
    }
  }

  /// What a finished branch contributes at the join point.
  ///
  /// Object outputs of the branch's nodes are merged in the order they ran;
  /// a non-object output is kept under the id of the node that produced it.
  pub fn branch_output(&self) -> serde_json::Value {
    let mut merged = serde_json::Map::new();
    for node_id in &self.nodes_executed {
      match self.node_outputs.get(node_id) {
        Some(serde_json::Value::Object(map)) => {
          merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Some(other) => {
          merged.insert(node_id.clone(), other.clone());
        }
        None => {}
      }
    }
    serde_json::Value::Object(merged)
  }

  /// Fold a finished branch's history (not its variables) into this context.
  pub fn absorb_history(&mut self, branch: ExecutionContext) {
    self.nodes_executed.extend(branch.nodes_executed);
    self.node_outputs.extend(branch.node_outputs);
    self.errors.extend(branch.errors);
  }

  pub fn elapsed_ms(&self) -> u64 {
    self.started.elapsed().as_millis() as u64
  }
}
