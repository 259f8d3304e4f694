//! Tracer collaborator.
//!
//! The engine opens one span per run and one per node. Hosts plug in their own
//! exporter through [`Tracer`]; [`NoopTracer`] is the default and
//! [`TracingTracer`] forwards spans to the `tracing` ecosystem.

use std::time::Instant;

use tracing::{debug, warn};

pub trait Span: Send {
  fn set_attributes(&mut self, attributes: serde_json::Value);

  fn record_exception(&mut self, error: &str);

  fn end(self: Box<Self>);
}

pub trait Tracer: Send + Sync {
  fn start_span(&self, name: &str, attributes: serde_json::Value) -> Box<dyn Span>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
  fn set_attributes(&mut self, _attributes: serde_json::Value) {}

  fn record_exception(&mut self, _error: &str) {}

  fn end(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
  fn start_span(&self, _name: &str, _attributes: serde_json::Value) -> Box<dyn Span> {
    Box::new(NoopSpan)
  }
}

/// Bridges spans onto `tracing` spans, logging exceptions and durations.
#[derive(Debug, Clone, Default)]
pub struct TracingTracer;

struct TracingSpan {
  span: tracing::Span,
  name: String,
  started: Instant,
}

impl Span for TracingSpan {
  fn set_attributes(&mut self, attributes: serde_json::Value) {
    self.span.in_scope(|| debug!(span = %self.name, attributes = %attributes, "span_attributes"));
  }

  fn record_exception(&mut self, error: &str) {
    self.span.in_scope(|| warn!(span = %self.name, error = %error, "span_exception"));
  }

  fn end(self: Box<Self>) {
    let elapsed_ms = self.started.elapsed().as_millis() as u64;
    self.span.in_scope(|| debug!(span = %self.name, elapsed_ms, "span_ended"));
  }
}

impl Tracer for TracingTracer {
  fn start_span(&self, name: &str, attributes: serde_json::Value) -> Box<dyn Span> {
    let span = tracing::info_span!("cadence", span = %name, attributes = %attributes);
    Box::new(TracingSpan {
      span,
      name: name.to_string(),
      started: Instant::now(),
    })
  }
}
