//! Procedures available to workflows run from the command line.

use std::sync::Arc;

use cadence_procedure::{HandlerError, InMemoryRegistry, Procedure, RegistryError};
use serde_json::{Value, json};

fn number(input: &Value, procedure: &str, field: &str) -> Result<f64, HandlerError> {
  input.get(field).and_then(Value::as_f64).ok_or_else(|| {
    HandlerError::new(format!("{} expects a numeric '{}'", procedure, field))
      .with_name("InvalidInput")
  })
}

pub fn builtin_registry() -> Result<Arc<InMemoryRegistry>, RegistryError> {
  let registry = InMemoryRegistry::new();

  registry.register(Procedure::from_fn("math.add", |input, _ctx| async move {
    let a = number(&input, "math.add", "a")?;
    let b = number(&input, "math.add", "b")?;
    Ok(json!({ "result": a + b }))
  }))?;

  registry.register(Procedure::from_fn("math.multiply", |input, _ctx| async move {
    let value = number(&input, "math.multiply", "result")?;
    let factor = number(&input, "math.multiply", "factor")?;
    Ok(json!({ "result": value * factor }))
  }))?;

  registry.register(Procedure::from_fn("math.subtract", |input, _ctx| async move {
    let value = number(&input, "math.subtract", "result")?;
    let amount = number(&input, "math.subtract", "amount")?;
    Ok(json!({ "result": value - amount }))
  }))?;

  registry.register(Procedure::from_fn("log.echo", |input, ctx| async move {
    let message = input.get("message").cloned().unwrap_or(Value::Null);
    tracing::info!(
      execution_id = %ctx.execution_id,
      node_id = ?ctx.node_id,
      message = %message,
      "echo"
    );
    Ok(json!({ "echoed": message }))
  }))?;

  // Resumes are driven by `cadence resume`; invoking the trigger directly
  // just hands the payload back.
  registry.register(Procedure::trigger_fn(
    "approval.trigger",
    |input, _ctx| async move { Ok(input) },
  ))?;

  Ok(Arc::new(registry))
}
