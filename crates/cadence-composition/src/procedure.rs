use std::sync::Arc;

use async_trait::async_trait;
use cadence_procedure::{Contract, Handler, HandlerError, Procedure, ProcedureContext, ProcedureRegistry};
use tracing::debug;

use crate::config::CompositionConfig;
use crate::error::CompositionError;
use crate::executor::CompositionExecutor;

/// Runs a composition as the handler of a procedure.
///
/// Members are resolved on every call, so a composition can be registered
/// before its members are. The procedure output is the composition's
/// `result` alone; the trace is logged, and attached to the error when the
/// composition fails.
pub struct CompositionHandler {
  config: CompositionConfig,
  executor: CompositionExecutor,
}

impl CompositionHandler {
  pub fn new(config: CompositionConfig, executor: CompositionExecutor) -> Self {
    Self { config, executor }
  }
}

#[async_trait]
impl Handler for CompositionHandler {
  async fn call(
    &self,
    input: serde_json::Value,
    ctx: ProcedureContext,
  ) -> Result<serde_json::Value, HandlerError> {
    match self.executor.run(&self.config, input, &ctx).await {
      Ok(output) => {
        debug!(
          composition = %self.config.name,
          steps = ?output.trace.steps_executed,
          recovered_errors = output.trace.errors.len(),
          "composition_procedure_completed"
        );
        Ok(output.result)
      }
      Err(e) => Err(into_handler_error(e)),
    }
  }
}

fn into_handler_error(error: CompositionError) -> HandlerError {
  let details = error
    .trace()
    .and_then(|trace| serde_json::to_value(trace).ok());

  let mut handler_error = HandlerError::from_error(&error).with_name("CompositionError");
  if let Some(details) = details {
    handler_error = handler_error.with_details(details);
  }
  handler_error
}

/// Package a composition as a procedure so it can be registered and used
/// anywhere a procedure can, including inside another composition.
pub fn composition_procedure(
  config: CompositionConfig,
  registry: Arc<dyn ProcedureRegistry>,
) -> Procedure {
  let contract = Contract::new(config.name.clone())
    .with_description(format!("{:?} composition", config.effective_type()));
  Procedure::new(
    contract,
    CompositionHandler::new(config, CompositionExecutor::new(registry)),
  )
}
