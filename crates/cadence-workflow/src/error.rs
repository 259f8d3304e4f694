use thiserror::Error;

/// A workflow definition failed validation.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("start node '{0}' not found in workflow")]
  MissingStartNode(String),

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("node '{from}' references unknown node '{to}'")]
  DanglingReference { from: String, to: String },

  #[error("invalid node '{node_id}': {message}")]
  InvalidNode { node_id: String, message: String },

  #[error("invalid expression in node '{node_id}': {source}")]
  Expression {
    node_id: String,
    #[source]
    source: ExpressionError,
  },

  #[error("failed to parse workflow definition: {0}")]
  Parse(#[from] serde_json::Error),
}

/// An expression failed to compile or evaluate.
#[derive(Debug, Error)]
#[error("expression `{source_text}`: {message}")]
pub struct ExpressionError {
  pub source_text: String,
  pub message: String,
}
