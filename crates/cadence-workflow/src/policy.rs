use serde::{Deserialize, Serialize};

/// How a group of steps reacts to a failing member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
  /// Abort on the first failure.
  #[default]
  Stop,
  /// Record the failure and keep going.
  Continue,
  /// Re-run the whole chain with backoff.
  Retry,
  /// Substitute a designated fallback procedure.
  Fallback,
}

/// Retry schedule: `delay_ms` is multiplied by `backoff_multiplier` after
/// every failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_delay_ms")]
  pub delay_ms: u64,
  #[serde(default = "default_backoff_multiplier")]
  pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      delay_ms: default_delay_ms(),
      backoff_multiplier: default_backoff_multiplier(),
    }
  }
}

fn default_max_attempts() -> u32 {
  3
}

fn default_delay_ms() -> u64 {
  1000
}

fn default_backoff_multiplier() -> f64 {
  2.0
}

/// Join behaviour for concurrently running members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelConfig {
  /// Join when every member settles. When false the first success wins.
  #[serde(default = "default_wait_for_all")]
  pub wait_for_all: bool,
  /// Upper bound on members in flight. `None` defers to the engine default.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_concurrency: Option<usize>,
}

impl Default for ParallelConfig {
  fn default() -> Self {
    Self {
      wait_for_all: true,
      max_concurrency: None,
    }
  }
}

fn default_wait_for_all() -> bool {
  true
}

/// How parallel branch outputs are combined at the join point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
  /// Keys are merged into one object in declared branch order; later
  /// branches overwrite earlier ones on collision.
  #[default]
  Flat,
  /// Each branch output is stored under its branch id.
  Namespaced,
}
