//! Cadence Composition
//!
//! A composition is a higher-order procedure: a named group of member
//! procedures run under one strategy.
//!
//! | Strategy | Behaviour |
//! |---|---|
//! | `sequential` | output of each step is the input of the next |
//! | `parallel` | members run concurrently, bounded by `maxConcurrency`; join or race |
//! | `conditional` | run the first member only if `conditionExpression` holds |
//! | `retry` | re-run the sequential chain with exponential backoff |
//! | `fallback` | on failure run `fallbackProcedureName` once with the original input |
//!
//! Every strategy produces the same [`CompositionTrace`]: steps actually run
//! (in order), their outputs, and every failure, including recovered ones.

mod config;
mod error;
mod executor;
mod procedure;
mod trace;

pub use config::{CompositionConfig, CompositionType};
pub use error::CompositionError;
pub use executor::CompositionExecutor;
pub use procedure::{CompositionHandler, composition_procedure};
pub use trace::{CompositionOutput, CompositionTrace, StepError};
