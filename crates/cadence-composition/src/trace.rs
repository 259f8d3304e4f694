//! Uniform execution trace shared by every strategy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A failed step, recorded even when the failure was recovered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
  pub step: String,
  pub error: String,
  pub timestamp: DateTime<Utc>,
}

impl StepError {
  pub fn new(step: impl Into<String>, error: impl Into<String>) -> Self {
    Self {
      step: step.into(),
      error: error.into(),
      timestamp: Utc::now(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionTrace {
  /// Ids of the steps actually run, in order.
  pub steps_executed: Vec<String>,
  /// Output of each successful step, keyed by step id.
  pub step_results: serde_json::Map<String, serde_json::Value>,
  /// Every failure, in the order it happened.
  pub errors: Vec<StepError>,
}

impl CompositionTrace {
  pub(crate) fn started(&mut self, step: &str) {
    self.steps_executed.push(step.to_string());
  }

  pub(crate) fn succeeded(&mut self, step: &str, output: &serde_json::Value) {
    self.step_results.insert(step.to_string(), output.clone());
  }

  pub(crate) fn failed(&mut self, step: &str, error: &impl std::fmt::Display) {
    self.errors.push(StepError::new(step, error.to_string()));
  }
}

/// Result of a successful composition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionOutput {
  pub result: serde_json::Value,
  #[serde(flatten)]
  pub trace: CompositionTrace,
}
