use serde::{Deserialize, Serialize};

use crate::node::WorkflowNode;

/// A serializable workflow definition, before validation.
///
/// Definitions are plain declarative data so they can be persisted,
/// transmitted and diffed. Use [`crate::Workflow::new`] to validate one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
  pub id: String,
  pub name: String,
  #[serde(default = "default_version")]
  pub version: String,
  pub start_node: String,
  pub nodes: Vec<WorkflowNode>,
  /// Initial variables of every execution.
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub variables: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> String {
  "1.0.0".to_string()
}

impl WorkflowDefinition {
  pub fn new(id: impl Into<String>, start_node: impl Into<String>, nodes: Vec<WorkflowNode>) -> Self {
    let id = id.into();
    Self {
      name: id.clone(),
      id,
      version: default_version(),
      start_node: start_node.into(),
      nodes,
      variables: serde_json::Map::new(),
    }
  }

  pub fn with_variables(mut self, variables: serde_json::Value) -> Self {
    if let serde_json::Value::Object(map) = variables {
      self.variables = map;
    }
    self
  }
}
