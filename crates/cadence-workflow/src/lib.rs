//! Cadence Workflow
//!
//! This crate provides the declarative workflow representation for cadence.
//! A [`WorkflowDefinition`] is plain serializable data (JSON with camelCase
//! field names). Wrapping it in a [`Workflow`] validates it and indexes its
//! nodes, producing the immutable form the engine executes:
//!
//! - `startNode` exists and every node id is unique
//! - every `next`, branch, `onError` and `onTimeout` reference resolves
//! - condition, switch and composition expressions compile
//! - inline switch branches are addressable by id like top-level nodes

mod definition;
mod error;
mod expression;
mod graph;
mod node;
mod policy;
mod workflow;

pub use definition::WorkflowDefinition;
pub use error::{ExpressionError, ValidationError};
pub use expression::{Expression, Scope};
pub use graph::Graph;
pub use node::{AwaitTimeout, Branch, FilterRef, Next, NodeKind, OneOrMany, WorkflowNode};
pub use policy::{ErrorHandling, MergeStrategy, ParallelConfig, RetryConfig};
pub use workflow::Workflow;
