//! Cadence Procedures
//!
//! A procedure is a named, contract-typed unit of logic: a [`Contract`]
//! (name, input/output schema, metadata) plus an async [`Handler`]. The
//! engine only needs one capability from its host, a registry lookup
//! `get(name)`, modelled by the [`ProcedureRegistry`] trait.
//!
//! ```ignore
//! let registry = InMemoryRegistry::new();
//! registry.register(Procedure::from_fn("math.add", |input, _ctx| async move {
//!   let a = input["a"].as_f64().unwrap_or_default();
//!   let b = input["b"].as_f64().unwrap_or_default();
//!   Ok(json!({ "result": a + b }))
//! }))?;
//! ```

mod contract;
mod error;
mod handler;
mod registry;

pub use contract::{Contract, ProcedureKind, ProcedureMetadata};
pub use error::{HandlerError, RegistryError};
pub use handler::{FnHandler, Handler, ProcedureContext};
pub use registry::{InMemoryRegistry, Procedure, ProcedureRegistry};
