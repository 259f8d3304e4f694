//! Serializable continuation of a suspended execution.

use cadence_composition::StepError;
use cadence_workflow::{FilterRef, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a paused execution is waiting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingFor {
  /// Trigger names that may resume the execution.
  pub procedures: Vec<String>,
  /// Catalogue filter the event must also pass.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filter: Option<FilterRef>,
}

/// Snapshot of an execution suspended at an await node.
///
/// Holds only data, so it can be persisted and handed back to the engine from
/// another process. Each state can be used for exactly one successful resume
/// or expiry, keyed by `pause_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseState {
  pub pause_id: String,
  pub execution_id: String,
  pub workflow_id: String,
  pub workflow_version: String,
  pub paused_at: String,
  pub waiting_for: WaitingFor,
  pub variables: Scope,
  #[serde(default)]
  pub node_outputs: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub nodes_executed: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<StepError>,
  pub paused_at_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_timeout_node: Option<String>,
}

impl PauseState {
  pub fn is_waiting_for(&self, trigger: &str) -> bool {
    self.waiting_for.procedures.iter().any(|p| p == trigger)
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    is_expired(self, now)
  }
}

/// Whether a pause state's timeout has passed at `now`.
///
/// States without a timeout never expire.
pub fn is_expired(pause_state: &PauseState, now: DateTime<Utc>) -> bool {
  pause_state
    .timeout_at
    .is_some_and(|timeout_at| now >= timeout_at)
}

/// An event offered to paused executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
  /// Trigger name the event was emitted under.
  pub name: String,
  pub payload: serde_json::Value,
  pub event_id: String,
  pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
  pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
    Self {
      name: name.into(),
      payload,
      event_id: uuid::Uuid::new_v4().to_string(),
      timestamp: Utc::now(),
    }
  }
}
