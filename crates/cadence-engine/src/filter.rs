//! Catalogue of resume filters.
//!
//! An await node never stores a predicate. It stores a [`FilterRef`], a
//! catalogue id plus JSON parameters, which survives persistence. The filter
//! itself is looked up here when an event arrives.
//!
//! Built-in filters:
//!
//! | id | params | passes when |
//! |---|---|---|
//! | `match-variable` | `{ "field": "orderId" }` | `event[field] == variables[field]` |
//! | `match-fields` | `{ "fields": ["a", "b"] }` | every listed field matches |
//! | `expression` | `{ "expression": "event.amount > variables.limit" }` | the expression is truthy |

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cadence_workflow::{Expression, FilterRef};

use crate::error::EngineError;
use crate::pause::PauseState;

/// A filter predicate: `(event payload, paused state, params) -> passes`.
///
/// Returns `Err(message)` when the params are unusable.
pub type FilterFn = Arc<
  dyn Fn(&serde_json::Value, &PauseState, &serde_json::Value) -> Result<bool, String> + Send + Sync,
>;

pub const MATCH_VARIABLE: &str = "match-variable";
pub const MATCH_FIELDS: &str = "match-fields";
pub const EXPRESSION: &str = "expression";

pub struct FilterCatalogue {
  filters: RwLock<HashMap<String, FilterFn>>,
}

impl Default for FilterCatalogue {
  fn default() -> Self {
    Self::new()
  }
}

impl FilterCatalogue {
  /// A catalogue with the built-in filters registered.
  pub fn new() -> Self {
    let catalogue = Self::empty();
    catalogue.register(MATCH_VARIABLE, match_variable);
    catalogue.register(MATCH_FIELDS, match_fields);
    catalogue.register(EXPRESSION, expression);
    catalogue
  }

  pub fn empty() -> Self {
    Self {
      filters: RwLock::new(HashMap::new()),
    }
  }

  /// Register (or replace) a filter.
  pub fn register<F>(&self, id: impl Into<String>, filter: F)
  where
    F: Fn(&serde_json::Value, &PauseState, &serde_json::Value) -> Result<bool, String>
      + Send
      + Sync
      + 'static,
  {
    let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
    filters.insert(id.into(), Arc::new(filter));
  }

  pub fn contains(&self, id: &str) -> bool {
    let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
    filters.contains_key(id)
  }

  /// Evaluate a filter reference against an event for a paused execution.
  pub fn evaluate(
    &self,
    filter: &FilterRef,
    event: &serde_json::Value,
    pause_state: &PauseState,
  ) -> Result<bool, EngineError> {
    let predicate = {
      let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
      filters.get(&filter.id).cloned()
    };
    let predicate = predicate.ok_or_else(|| EngineError::UnknownFilter {
      node_id: pause_state.paused_at.clone(),
      filter_id: filter.id.clone(),
    })?;

    predicate(event, pause_state, &filter.params).map_err(|message| EngineError::InvalidFilter {
      filter_id: filter.id.clone(),
      message,
    })
  }
}

fn field_matches(event: &serde_json::Value, pause_state: &PauseState, field: &str) -> bool {
  match (event.get(field), pause_state.variables.get(field)) {
    (Some(actual), Some(expected)) => actual == expected,
    _ => false,
  }
}

fn match_variable(
  event: &serde_json::Value,
  pause_state: &PauseState,
  params: &serde_json::Value,
) -> Result<bool, String> {
  let field = params
    .get("field")
    .and_then(|f| f.as_str())
    .ok_or("params.field must be a string")?;
  Ok(field_matches(event, pause_state, field))
}

fn match_fields(
  event: &serde_json::Value,
  pause_state: &PauseState,
  params: &serde_json::Value,
) -> Result<bool, String> {
  let fields = params
    .get("fields")
    .and_then(|f| f.as_array())
    .ok_or("params.fields must be a list")?;

  let mut all_match = true;
  for field in fields {
    let field = field.as_str().ok_or("params.fields must contain strings")?;
    all_match &= field_matches(event, pause_state, field);
  }
  Ok(all_match)
}

fn expression(
  event: &serde_json::Value,
  pause_state: &PauseState,
  params: &serde_json::Value,
) -> Result<bool, String> {
  let source = params
    .get("expression")
    .and_then(|e| e.as_str())
    .ok_or("params.expression must be a string")?;

  let scope = serde_json::json!({
    "event": event,
    "variables": pause_state.variables,
  });
  Expression::new(source)
    .is_truthy(&scope)
    .map_err(|e| e.to_string())
}
