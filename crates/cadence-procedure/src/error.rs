use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error raised inside a procedure handler.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct HandlerError {
  /// Error class, `HandlerError` unless the handler names it.
  pub name: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<serde_json::Value>,
}

impl HandlerError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      name: "HandlerError".to_string(),
      message: message.into(),
      stack: None,
      details: None,
    }
  }

  /// Build a handler error from any error, keeping its source chain as the stack.
  pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
      chain.push(format!("caused by: {}", cause));
      source = cause.source();
    }

    let mut handler_error = Self::new(error.to_string());
    if !chain.is_empty() {
      handler_error.stack = Some(chain.join("\n"));
    }
    handler_error
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_details(mut self, details: serde_json::Value) -> Self {
    self.details = Some(details);
    self
  }
}

impl From<serde_json::Error> for HandlerError {
  fn from(e: serde_json::Error) -> Self {
    Self::new(format!("invalid JSON: {}", e)).with_name("SerializationError")
  }
}

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("procedure already registered: {0}")]
  AlreadyRegistered(String),

  #[error("procedure not found: {0}")]
  NotFound(String),
}
