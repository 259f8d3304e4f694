//! Cadence Workflow Engine
//!
//! This crate executes validated [`cadence_workflow::Workflow`]s against a
//! procedure registry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TriggerBus                           │
//! │  - on(name, handler) / emit(name, payload)                  │
//! │  - parks paused executions, resumes those whose filter      │
//! │    matches, expires overdue ones                            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - execute(workflow, input, cancel) → ExecutionResult       │
//! │  - resume(workflow, pause_state, event, cancel)             │
//! │  - expire(workflow, pause_state, now, cancel)               │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Node interpreter                        │
//! │  - procedure / condition / switch / parallel /              │
//! │    sequential / await                                       │
//! │  - compositions via cadence-composition                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let engine = Arc::new(Engine::new(registry));
//! let result = engine.execute(&workflow, json!({"orderId": "o1"}), CancellationToken::new()).await?;
//!
//! if let Some(pause_state) = result.resume_state {
//!   // persist pause_state, later:
//!   let event = TriggerEvent::new("approval.trigger", json!({"orderId": "o1", "approved": true}));
//!   let resumed = engine.resume(&workflow, pause_state, event, CancellationToken::new()).await?;
//! }
//! ```

mod bus;
mod context;
mod engine;
mod error;
mod events;
mod filter;
mod interpreter;
mod parallel;
mod pause;
mod result;
mod telemetry;

pub use bus::{EmitReport, TriggerBus};
pub use context::ExecutionContext;
pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use filter::{EXPRESSION, FilterCatalogue, FilterFn, MATCH_FIELDS, MATCH_VARIABLE};
pub use pause::{PauseState, TriggerEvent, WaitingFor, is_expired};
pub use result::{ExecutionFailure, ExecutionResult, ExecutionStatus};
pub use telemetry::{NoopTracer, Span, Tracer, TracingTracer};
