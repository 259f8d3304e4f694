use cadence_workflow::{ErrorHandling, Expression, ParallelConfig, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::error::CompositionError;

/// Execution strategy of a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionType {
  Sequential,
  Parallel,
  Conditional,
  Retry,
  Fallback,
}

/// A named group of procedures run under one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionConfig {
  pub name: String,
  #[serde(rename = "type")]
  pub composition_type: CompositionType,
  /// Ordered member procedure names.
  pub procedures: Vec<String>,
  #[serde(default)]
  pub error_handling: ErrorHandling,
  #[serde(default)]
  pub retry_config: RetryConfig,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fallback_procedure_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition_expression: Option<Expression>,
  #[serde(default)]
  pub parallel_config: ParallelConfig,
}

impl CompositionConfig {
  pub fn new(
    name: impl Into<String>,
    composition_type: CompositionType,
    procedures: &[&str],
  ) -> Self {
    Self {
      name: name.into(),
      composition_type,
      procedures: procedures.iter().map(|p| p.to_string()).collect(),
      error_handling: ErrorHandling::default(),
      retry_config: RetryConfig::default(),
      fallback_procedure_name: None,
      condition_expression: None,
      parallel_config: ParallelConfig::default(),
    }
  }

  pub fn with_error_handling(mut self, error_handling: ErrorHandling) -> Self {
    self.error_handling = error_handling;
    self
  }

  pub fn with_retry(mut self, retry_config: RetryConfig) -> Self {
    self.retry_config = retry_config;
    self
  }

  pub fn with_fallback(mut self, procedure_name: impl Into<String>) -> Self {
    self.fallback_procedure_name = Some(procedure_name.into());
    self
  }

  pub fn with_condition(mut self, expression: impl Into<Expression>) -> Self {
    self.condition_expression = Some(expression.into());
    self
  }

  pub fn with_parallel(mut self, parallel_config: ParallelConfig) -> Self {
    self.parallel_config = parallel_config;
    self
  }

  /// The strategy actually run.
  ///
  /// A sequential composition whose error handling is `retry` or `fallback`
  /// runs as the corresponding strategy.
  pub fn effective_type(&self) -> CompositionType {
    match (self.composition_type, self.error_handling) {
      (CompositionType::Sequential, ErrorHandling::Retry) => CompositionType::Retry,
      (CompositionType::Sequential, ErrorHandling::Fallback) => CompositionType::Fallback,
      (composition_type, _) => composition_type,
    }
  }

  /// Check the config is runnable.
  pub fn validate(&self) -> Result<(), CompositionError> {
    let invalid = |message: &str| CompositionError::InvalidConfig {
      name: self.name.clone(),
      message: message.to_string(),
    };

    if self.procedures.is_empty() {
      return Err(invalid("at least one procedure is required"));
    }

    match self.effective_type() {
      CompositionType::Conditional => {
        let expression = self
          .condition_expression
          .as_ref()
          .ok_or_else(|| invalid("conditional composition requires conditionExpression"))?;
        expression
          .check()
          .map_err(|source| CompositionError::Expression {
            name: self.name.clone(),
            source,
          })?;
      }
      CompositionType::Retry => {
        if self.retry_config.max_attempts == 0 {
          return Err(invalid("retryConfig.maxAttempts must be at least 1"));
        }
      }
      CompositionType::Fallback => {
        if self.fallback_procedure_name.is_none() {
          return Err(invalid("fallback composition requires fallbackProcedureName"));
        }
      }
      CompositionType::Parallel => {
        if self.parallel_config.max_concurrency == Some(0) {
          return Err(invalid("parallelConfig.maxConcurrency must be at least 1"));
        }
      }
      CompositionType::Sequential => {}
    }

    Ok(())
  }
}
