use cadence_procedure::HandlerError;
use cadence_workflow::ExpressionError;

use crate::trace::CompositionTrace;

/// Errors from running a composition.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
  /// The composition config is unusable.
  #[error("invalid composition '{name}': {message}")]
  InvalidConfig { name: String, message: String },

  /// A member procedure is not registered.
  #[error("procedure not found: {0}")]
  ProcedureNotFound(String),

  /// A step failed and the error policy did not recover it.
  #[error("composition '{name}' failed at step '{step}': {source}")]
  StepFailed {
    name: String,
    step: String,
    #[source]
    source: HandlerError,
    trace: CompositionTrace,
  },

  /// The condition expression could not be evaluated.
  #[error("composition '{name}': {source}")]
  Expression {
    name: String,
    #[source]
    source: ExpressionError,
  },

  /// Execution was cancelled.
  #[error("composition '{0}' cancelled")]
  Cancelled(String),
}

impl CompositionError {
  /// The partial trace of a failed run, if any steps ran.
  pub fn trace(&self) -> Option<&CompositionTrace> {
    match self {
      CompositionError::StepFailed { trace, .. } => Some(trace),
      _ => None,
    }
  }
}
