//! In-process trigger event bus.
//!
//! The bus is an explicit instance owned by the host, constructed over one
//! [`Engine`]. `emit` delivers an event to directly registered listeners and
//! then offers it to every parked execution waiting for that trigger name.
//! Executions whose filter matches are resumed; the rest stay parked.
//!
//! Matching happens under the parking lock before any await, and only the
//! matched executions leave the parked set. Concurrent `emit` calls therefore
//! always see every execution they could resume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use cadence_procedure::{Handler, HandlerError, Procedure, ProcedureContext};
use cadence_workflow::Workflow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::pause::{PauseState, TriggerEvent};
use crate::result::ExecutionResult;

/// What a single `emit` did.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitReport {
  pub listeners_invoked: usize,
  pub listener_errors: Vec<HandlerError>,
  /// Results of every execution the event resumed.
  pub resumed: Vec<ExecutionResult>,
}

struct Parked {
  workflow: Arc<Workflow>,
  state: PauseState,
}

pub struct TriggerBus {
  engine: Arc<Engine>,
  listeners: RwLock<HashMap<String, Vec<Arc<dyn Handler>>>>,
  parked: Mutex<Vec<Parked>>,
  cancel: CancellationToken,
}

impl TriggerBus {
  pub fn new(engine: Arc<Engine>) -> Self {
    Self {
      engine,
      listeners: RwLock::new(HashMap::new()),
      parked: Mutex::new(Vec::new()),
      cancel: CancellationToken::new(),
    }
  }

  /// Cancel listeners and resumed executions when `cancel` fires.
  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn engine(&self) -> &Arc<Engine> {
    &self.engine
  }

  /// Register a listener for a trigger name.
  pub fn on(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
    let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
    listeners.entry(name.into()).or_default().push(handler);
  }

  /// Register a procedure's handler as a listener under its own name.
  pub fn on_procedure(&self, procedure: &Procedure) {
    self.on(procedure.name(), procedure.handler.clone());
  }

  pub fn listener_count(&self, name: &str) -> usize {
    let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
    listeners.get(name).map_or(0, Vec::len)
  }

  /// Hold a paused execution until a matching event (or its timeout) arrives.
  pub fn park(&self, workflow: Arc<Workflow>, pause_state: PauseState) {
    debug!(
      execution_id = %pause_state.execution_id,
      node_id = %pause_state.paused_at,
      waiting_for = ?pause_state.waiting_for.procedures,
      "execution_parked"
    );
    let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
    parked.push(Parked {
      workflow,
      state: pause_state,
    });
  }

  pub fn paused_count(&self) -> usize {
    self.parked.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  /// Snapshot of every parked pause state, for persistence.
  pub fn paused_states(&self) -> Vec<PauseState> {
    let parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
    parked.iter().map(|p| p.state.clone()).collect()
  }

  /// Execute a workflow, parking it if it pauses.
  pub async fn start(
    &self,
    workflow: Arc<Workflow>,
    input: serde_json::Value,
  ) -> Result<ExecutionResult, EngineError> {
    let result = self
      .engine
      .execute(&workflow, input, self.cancel.child_token())
      .await?;
    if let Some(pause_state) = &result.resume_state {
      self.park(workflow, pause_state.clone());
    }
    Ok(result)
  }

  /// Publish an event.
  ///
  /// Listener failures are collected in the report and never stop delivery.
  pub async fn emit(&self, name: &str, payload: serde_json::Value) -> EmitReport {
    let event = TriggerEvent::new(name, payload);
    info!(trigger = %name, event_id = %event.event_id, "trigger_emitted");

    let mut report = EmitReport::default();

    let listeners = {
      let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
      listeners.get(name).cloned().unwrap_or_default()
    };
    for handler in listeners {
      let ctx = ProcedureContext::new(event.event_id.clone())
        .with_cancel(self.cancel.child_token())
        .for_procedure(name);
      report.listeners_invoked += 1;
      if let Err(e) = handler.call(event.payload.clone(), ctx).await {
        warn!(trigger = %name, error = %e, "listener_failed");
        report.listener_errors.push(e);
      }
    }

    let now = Utc::now();
    let candidates = self.take_parked(|state| self.accepts(state, &event, now));
    let mut keep = Vec::new();

    for candidate in candidates {
      let outcome = self
        .engine
        .resume(
          &candidate.workflow,
          candidate.state.clone(),
          event.clone(),
          self.cancel.child_token(),
        )
        .await;

      match outcome {
        Ok(result) => {
          if let Some(next) = &result.resume_state {
            keep.push(Parked {
              workflow: candidate.workflow.clone(),
              state: next.clone(),
            });
          }
          report.resumed.push(result);
        }
        Err(
          EngineError::FilterRejected { .. }
          | EngineError::TriggerNotAwaited { .. }
          | EngineError::Timeout { .. },
        ) => keep.push(candidate),
        Err(e) => {
          warn!(
            execution_id = %candidate.state.execution_id,
            error = %e,
            "dropping parked execution"
          );
        }
      }
    }

    self.return_parked(keep);
    info!(
      trigger = %name,
      listeners = report.listeners_invoked,
      resumed = report.resumed.len(),
      "trigger_delivered"
    );
    report
  }

  /// Expire every parked execution whose timeout has passed at `now`.
  pub async fn expire_due(&self, now: DateTime<Utc>) -> Vec<ExecutionResult> {
    let due = self.take_parked(|state| state.is_expired(now));
    let mut keep = Vec::new();
    let mut results = Vec::new();

    for parked in due {
      match self
        .engine
        .expire(&parked.workflow, parked.state, now, self.cancel.child_token())
        .await
      {
        Ok(result) => {
          if let Some(next) = &result.resume_state {
            keep.push(Parked {
              workflow: parked.workflow.clone(),
              state: next.clone(),
            });
          }
          results.push(result);
        }
        Err(e) => warn!(error = %e, "failed to expire parked execution"),
      }
    }

    self.return_parked(keep);
    results
  }

  /// Whether `event` would resume `state` right now.
  ///
  /// A filter that cannot be evaluated counts as a match, so that `resume`
  /// reports the error and the entry is dropped instead of lingering.
  fn accepts(&self, state: &PauseState, event: &TriggerEvent, now: DateTime<Utc>) -> bool {
    if !state.is_waiting_for(&event.name) || state.is_expired(now) {
      return false;
    }
    match &state.waiting_for.filter {
      Some(filter) => self
        .engine
        .filters()
        .evaluate(filter, &event.payload, state)
        .unwrap_or(true),
      None => true,
    }
  }

  fn take_parked(&self, mut predicate: impl FnMut(&PauseState) -> bool) -> Vec<Parked> {
    let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
    let (taken, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *parked)
      .into_iter()
      .partition(|p| predicate(&p.state));
    *parked = rest;
    taken
  }

  fn return_parked(&self, entries: Vec<Parked>) {
    let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
    parked.extend(entries);
  }
}
