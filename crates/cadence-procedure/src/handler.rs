use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;

/// Context handed to a handler alongside its input.
///
/// Derived from the running execution: it identifies the execution and node
/// that invoked the procedure and carries a cancellation token that fires
/// when the caller abandons the call (for example a losing race branch).
#[derive(Debug, Clone)]
pub struct ProcedureContext {
  pub execution_id: String,
  pub workflow_id: Option<String>,
  pub node_id: Option<String>,
  pub procedure_name: String,
  pub cancel: CancellationToken,
}

impl ProcedureContext {
  pub fn new(execution_id: impl Into<String>) -> Self {
    Self {
      execution_id: execution_id.into(),
      workflow_id: None,
      node_id: None,
      procedure_name: String::new(),
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
    self.workflow_id = Some(workflow_id.into());
    self
  }

  pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
    self.node_id = Some(node_id.into());
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Derive the context for invoking `procedure_name`.
  pub fn for_procedure(&self, procedure_name: &str) -> Self {
    Self {
      procedure_name: procedure_name.to_string(),
      ..self.clone()
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}

/// The async body of a procedure.
#[async_trait]
pub trait Handler: Send + Sync {
  async fn call(
    &self,
    input: serde_json::Value,
    ctx: ProcedureContext,
  ) -> Result<serde_json::Value, HandlerError>;
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
  pub fn new(f: F) -> Self {
    Self(f)
  }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
  F: Fn(serde_json::Value, ProcedureContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
  async fn call(
    &self,
    input: serde_json::Value,
    ctx: ProcedureContext,
  ) -> Result<serde_json::Value, HandlerError> {
    (self.0)(input, ctx).await
  }
}
