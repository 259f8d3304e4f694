use serde::{Deserialize, Serialize};

/// Whether a procedure is a request/response call or an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureKind {
  #[default]
  Procedure,
  /// Invocation represents an event; await nodes listen on trigger names.
  Trigger,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureMetadata {
  #[serde(default)]
  pub kind: ProcedureKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
}

/// The typed interface of a procedure.
///
/// Schemas are JSON Schema documents. The engine does not validate against
/// them; they are carried for hosts and tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
  pub name: String,
  #[serde(default)]
  pub input_schema: serde_json::Value,
  #[serde(default)]
  pub output_schema: serde_json::Value,
  #[serde(default)]
  pub metadata: ProcedureMetadata,
}

impl Contract {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      input_schema: serde_json::Value::Null,
      output_schema: serde_json::Value::Null,
      metadata: ProcedureMetadata::default(),
    }
  }

  /// A contract for a trigger procedure.
  pub fn trigger(name: impl Into<String>) -> Self {
    let mut contract = Self::new(name);
    contract.metadata.kind = ProcedureKind::Trigger;
    contract
  }

  pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
    self.input_schema = schema;
    self
  }

  pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
    self.output_schema = schema;
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.metadata.description = Some(description.into());
    self
  }

  pub fn is_trigger(&self) -> bool {
    self.metadata.kind == ProcedureKind::Trigger
  }
}
