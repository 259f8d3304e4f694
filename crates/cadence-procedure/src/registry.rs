use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::contract::Contract;
use crate::error::{HandlerError, RegistryError};
use crate::handler::{FnHandler, Handler, ProcedureContext};

/// A contract paired with its handler.
#[derive(Clone)]
pub struct Procedure {
  pub contract: Contract,
  pub handler: Arc<dyn Handler>,
}

impl Procedure {
  pub fn new(contract: Contract, handler: impl Handler + 'static) -> Self {
    Self {
      contract,
      handler: Arc::new(handler),
    }
  }

  /// Build a procedure from an async closure.
  pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(serde_json::Value, ProcedureContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
  {
    Self::new(Contract::new(name), FnHandler::new(f))
  }

  /// Build a trigger procedure from an async closure.
  pub fn trigger_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(serde_json::Value, ProcedureContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
  {
    Self::new(Contract::trigger(name), FnHandler::new(f))
  }

  pub fn name(&self) -> &str {
    &self.contract.name
  }

  /// Invoke the handler with a context derived for this procedure.
  pub async fn invoke(
    &self,
    input: serde_json::Value,
    ctx: &ProcedureContext,
  ) -> Result<serde_json::Value, HandlerError> {
    self
      .handler
      .call(input, ctx.for_procedure(&self.contract.name))
      .await
  }
}

impl fmt::Debug for Procedure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Procedure")
      .field("contract", &self.contract)
      .finish_non_exhaustive()
  }
}

/// Lookup of procedures by name.
pub trait ProcedureRegistry: Send + Sync {
  /// Get a procedure by name.
  fn get(&self, name: &str) -> Option<Procedure>;

  /// Names of all registered procedures, sorted.
  fn names(&self) -> Vec<String>;
}

/// Registry backed by an in-memory map.
#[derive(Default)]
pub struct InMemoryRegistry {
  procedures: RwLock<HashMap<String, Procedure>>,
}

impl InMemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a procedure. Names must be unique.
  pub fn register(&self, procedure: Procedure) -> Result<(), RegistryError> {
    let mut procedures = self.procedures.write().unwrap_or_else(|e| e.into_inner());
    let name = procedure.name().to_string();
    if procedures.contains_key(&name) {
      return Err(RegistryError::AlreadyRegistered(name));
    }
    procedures.insert(name, procedure);
    Ok(())
  }

  /// Register or replace a procedure.
  pub fn upsert(&self, procedure: Procedure) {
    let mut procedures = self.procedures.write().unwrap_or_else(|e| e.into_inner());
    procedures.insert(procedure.name().to_string(), procedure);
  }

  /// Remove a procedure.
  pub fn remove(&self, name: &str) -> Result<Procedure, RegistryError> {
    let mut procedures = self.procedures.write().unwrap_or_else(|e| e.into_inner());
    procedures
      .remove(name)
      .ok_or_else(|| RegistryError::NotFound(name.to_string()))
  }

  /// All registered trigger procedures.
  pub fn triggers(&self) -> Vec<Procedure> {
    let procedures = self.procedures.read().unwrap_or_else(|e| e.into_inner());
    procedures
      .values()
      .filter(|p| p.contract.is_trigger())
      .cloned()
      .collect()
  }

  pub fn len(&self) -> usize {
    self
      .procedures
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl ProcedureRegistry for InMemoryRegistry {
  fn get(&self, name: &str) -> Option<Procedure> {
    let procedures = self.procedures.read().unwrap_or_else(|e| e.into_inner());
    procedures.get(name).cloned()
  }

  fn names(&self) -> Vec<String> {
    let procedures = self.procedures.read().unwrap_or_else(|e| e.into_inner());
    let mut names: Vec<String> = procedures.keys().cloned().collect();
    names.sort();
    names
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn add() -> Procedure {
    Procedure::from_fn("math.add", |input, _ctx| async move {
      let a = input["a"].as_i64().unwrap_or_default();
      let b = input["b"].as_i64().unwrap_or_default();
      Ok(json!({ "result": a + b }))
    })
  }

  #[tokio::test]
  async fn test_register_and_invoke() {
    let registry = InMemoryRegistry::new();
    registry.register(add()).unwrap();

    let procedure = registry.get("math.add").expect("registered");
    let output = procedure
      .invoke(json!({"a": 2, "b": 3}), &ProcedureContext::new("exec-1"))
      .await
      .unwrap();

    assert_eq!(output, json!({"result": 5}));
    assert_eq!(registry.names(), vec!["math.add".to_string()]);
  }

  #[test]
  fn test_duplicate_registration_rejected() {
    let registry = InMemoryRegistry::new();
    registry.register(add()).unwrap();

    assert!(matches!(
      registry.register(add()),
      Err(RegistryError::AlreadyRegistered(name)) if name == "math.add"
    ));
    assert_eq!(registry.len(), 1);
  }

  #[tokio::test]
  async fn test_upsert_replaces_procedure() {
    let registry = InMemoryRegistry::new();
    registry.register(add()).unwrap();

    registry.upsert(Procedure::from_fn("math.add", |_input, _ctx| async move {
      Ok(json!({ "result": "replaced" }))
    }));
    registry.upsert(Procedure::from_fn("math.negate", |input, _ctx| async move {
      Ok(json!({ "result": -input["a"].as_i64().unwrap_or_default() }))
    }));

    assert_eq!(registry.len(), 2);
    let output = registry
      .get("math.add")
      .unwrap()
      .invoke(json!({"a": 2, "b": 3}), &ProcedureContext::new("exec-1"))
      .await
      .unwrap();
    assert_eq!(output, json!({"result": "replaced"}));
  }

  #[test]
  fn test_missing_procedure() {
    let registry = InMemoryRegistry::new();
    assert!(registry.get("nope").is_none());
    assert!(registry.remove("nope").is_err());
    assert!(registry.is_empty());
  }

  #[tokio::test]
  async fn test_context_carries_procedure_name() {
    let registry = InMemoryRegistry::new();
    registry
      .register(Procedure::from_fn("whoami", |_input, ctx| async move {
        Ok(json!({
          "procedure": ctx.procedure_name,
          "node": ctx.node_id,
        }))
      }))
      .unwrap();

    let ctx = ProcedureContext::new("exec-1").with_node("n1");
    let output = registry
      .get("whoami")
      .unwrap()
      .invoke(json!({}), &ctx)
      .await
      .unwrap();

    assert_eq!(output, json!({"procedure": "whoami", "node": "n1"}));
  }

  #[test]
  fn test_triggers_listed() {
    let registry = InMemoryRegistry::new();
    registry.register(add()).unwrap();
    registry
      .register(Procedure::trigger_fn("approval.trigger", |input, _ctx| async move {
        Ok(input)
      }))
      .unwrap();

    let triggers = registry.triggers();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].name(), "approval.trigger");
  }

  #[test]
  fn test_handler_error_from_error_keeps_chain() {
    let io = std::io::Error::other("disk full");
    let err = HandlerError::from_error(&io);
    assert_eq!(err.name, "HandlerError");
    assert_eq!(err.message, "disk full");
  }
}
