//! Error types for workflow execution.

use cadence_workflow::ValidationError;
use thiserror::Error;

/// Errors that reject an `execute`, `resume` or `expire` call outright.
///
/// Failures that happen while a run is in progress do not surface here; they
/// end the run with `status = failed` and an [`crate::ExecutionFailure`].
#[derive(Debug, Error)]
pub enum EngineError {
  /// The workflow definition is malformed.
  #[error("invalid workflow: {0}")]
  Validation(#[from] ValidationError),

  /// An await node references a filter the catalogue does not know.
  #[error("await node '{node_id}' references unknown filter '{filter_id}'")]
  UnknownFilter { node_id: String, filter_id: String },

  /// Filter parameters could not be interpreted.
  #[error("filter '{filter_id}' is misconfigured: {message}")]
  InvalidFilter { filter_id: String, message: String },

  /// The pause state belongs to a different workflow.
  #[error("pause state belongs to workflow '{actual}', not '{expected}'")]
  WorkflowMismatch { expected: String, actual: String },

  /// The pause state was already resumed or expired.
  #[error("pause state '{pause_id}' has already been consumed")]
  PauseStateConsumed { pause_id: String },

  /// The pause state is older than the engine's pause retention, so the
  /// consumed ledger can no longer vouch for it.
  #[error("pause state '{pause_id}' is older than the pause retention window")]
  StalePauseState { pause_id: String },

  /// The node the execution paused at is missing or is not an await node.
  #[error("paused node '{node_id}' is not an await node of this workflow")]
  UnknownPauseNode { node_id: String },

  /// The event's trigger is not one the execution waits for.
  #[error("execution paused at '{node_id}' is not waiting for trigger '{trigger}'")]
  TriggerNotAwaited { node_id: String, trigger: String },

  /// The await filter rejected the event.
  #[error("filter '{filter_id}' rejected event for execution paused at '{node_id}'")]
  FilterRejected { node_id: String, filter_id: String },

  /// The pause state timed out; it can only be expired now.
  #[error("execution paused at '{node_id}' timed out")]
  Timeout { node_id: String },

  /// `expire` was called before the pause state's deadline.
  #[error("pause state '{pause_id}' has not expired")]
  NotExpired { pause_id: String },
}
