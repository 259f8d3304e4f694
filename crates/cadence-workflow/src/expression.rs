//! Sandboxed expression evaluation.
//!
//! Condition nodes, switch selectors and conditional compositions reference
//! variables through expressions such as `amount > threshold and approved`
//! or `order.region`. Expressions are compiled and evaluated by minijinja's
//! expression engine, which only supports lookups, comparisons, boolean logic,
//! filters and tests. Workflow definitions can come from external sources, so
//! nothing in an expression ever executes host code.
//!
//! # Examples
//!
//! ```
//! use cadence_workflow::Expression;
//! use serde_json::json;
//!
//! let expr = Expression::new("amount > 100 and status == 'open'");
//! let scope = json!({ "amount": 250, "status": "open" });
//! assert!(expr.is_truthy(scope.as_object().unwrap()).unwrap());
//! ```

use minijinja::Environment;
use serde::{Deserialize, Serialize};

use crate::error::ExpressionError;

/// Variables visible to an expression.
pub type Scope = serde_json::Map<String, serde_json::Value>;

/// A restricted expression over workflow variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression(String);

impl Expression {
  pub fn new(source: impl Into<String>) -> Self {
    Self(source.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Compile the expression without evaluating it.
  pub fn check(&self) -> Result<(), ExpressionError> {
    let env = Environment::new();
    env
      .compile_expression(&self.0)
      .map(|_| ())
      .map_err(|e| self.error(e))
  }

  /// Evaluate the expression and convert the result to JSON.
  ///
  /// Undefined lookups evaluate to `null`.
  pub fn evaluate<S: Serialize>(&self, scope: &S) -> Result<serde_json::Value, ExpressionError> {
    let value = self.eval_raw(scope)?;
    if value.is_undefined() || value.is_none() {
      return Ok(serde_json::Value::Null);
    }
    serde_json::to_value(&value).map_err(|e| ExpressionError {
      source_text: self.0.clone(),
      message: format!("result is not representable as JSON: {}", e),
    })
  }

  /// Evaluate the expression as a boolean using Jinja truthiness.
  pub fn is_truthy<S: Serialize>(&self, scope: &S) -> Result<bool, ExpressionError> {
    Ok(self.eval_raw(scope)?.is_true())
  }

  /// Evaluate the expression as a switch discriminant.
  ///
  /// Strings are used as-is, other values by their display form. Returns
  /// `None` when the result is undefined or `none`.
  pub fn discriminant<S: Serialize>(&self, scope: &S) -> Result<Option<String>, ExpressionError> {
    let value = self.eval_raw(scope)?;
    if value.is_undefined() || value.is_none() {
      return Ok(None);
    }
    Ok(Some(match value.as_str() {
      Some(s) => s.to_string(),
      None => value.to_string(),
    }))
  }

  fn eval_raw<S: Serialize>(&self, scope: &S) -> Result<minijinja::Value, ExpressionError> {
    let env = Environment::new();
    let compiled = env.compile_expression(&self.0).map_err(|e| self.error(e))?;
    compiled.eval(scope).map_err(|e| self.error(e))
  }

  fn error(&self, e: minijinja::Error) -> ExpressionError {
    ExpressionError {
      source_text: self.0.clone(),
      message: e.to_string(),
    }
  }
}

impl From<&str> for Expression {
  fn from(source: &str) -> Self {
    Self::new(source)
  }
}
