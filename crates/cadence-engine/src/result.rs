//! Workflow execution results.

use cadence_composition::{CompositionError, StepError};
use cadence_procedure::HandlerError;
use serde::{Deserialize, Serialize};

use crate::pause::PauseState;

/// Terminal (or suspended) state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Completed,
  Failed,
  Paused,
  Cancelled,
}

/// Structured error of a failed run.
///
/// `name` is the error class: `HandlerError` (or the handler's own name),
/// `ProcedureNotFound`, `CompositionError`, `ExpressionError`,
/// `TimeoutError`, `ValidationError` or `StepLimitExceeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
  pub name: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<serde_json::Value>,
}

impl ExecutionFailure {
  pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      message: message.into(),
      stack: None,
      node_id: None,
      details: None,
    }
  }

  pub fn procedure_not_found(procedure_name: &str) -> Self {
    Self::new(
      "ProcedureNotFound",
      format!("procedure not found: {}", procedure_name),
    )
  }

  pub fn timeout(node_id: &str) -> Self {
    Self::new(
      "TimeoutError",
      format!("await node '{}' timed out", node_id),
    )
  }

  pub fn at_node(mut self, node_id: &str) -> Self {
    self.node_id = Some(node_id.to_string());
    self
  }

  /// The value stored in `variables.error` when a failure is routed.
  pub fn to_value(&self) -> serde_json::Value {
    serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "message": self.message }))
  }
}

impl From<HandlerError> for ExecutionFailure {
  fn from(e: HandlerError) -> Self {
    Self {
      name: e.name,
      message: e.message,
      stack: e.stack,
      node_id: None,
      details: e.details,
    }
  }
}

impl From<CompositionError> for ExecutionFailure {
  fn from(e: CompositionError) -> Self {
    let name = match &e {
      CompositionError::ProcedureNotFound(_) => "ProcedureNotFound",
      CompositionError::Expression { .. } => "ExpressionError",
      _ => "CompositionError",
    };
    let details = e.trace().and_then(|trace| serde_json::to_value(trace).ok());
    let stack = match &e {
      CompositionError::StepFailed { source, .. } => source.stack.clone(),
      _ => None,
    };

    Self {
      name: name.to_string(),
      message: e.to_string(),
      stack,
      node_id: None,
      details,
    }
  }
}

/// Result of an `execute`, `resume` or `expire` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
  pub execution_id: String,
  pub workflow_id: String,
  pub status: ExecutionStatus,
  /// Node ids in the order they ran, across every resume.
  pub nodes_executed: Vec<String>,
  /// Final variables of the run.
  pub outputs: serde_json::Map<String, serde_json::Value>,
  pub node_outputs: serde_json::Map<String, serde_json::Value>,
  /// Recovered failures from parallel nodes and compositions.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<StepError>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ExecutionFailure>,
  /// Present iff `status` is `paused`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resume_state: Option<PauseState>,
  pub execution_time_ms: u64,
}

impl ExecutionResult {
  pub fn is_completed(&self) -> bool {
    self.status == ExecutionStatus::Completed
  }

  pub fn is_paused(&self) -> bool {
    self.status == ExecutionStatus::Paused
  }

  pub fn is_failed(&self) -> bool {
    self.status == ExecutionStatus::Failed
  }
}
