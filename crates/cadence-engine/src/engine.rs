//! Workflow execution engine.
//!
//! The [`Engine`] runs workflows against a procedure registry, suspends them
//! at await nodes and resumes them from a [`PauseState`].

use std::collections::HashMap;
use std::time::Duration;
use std::sync::{Arc, Mutex};

use cadence_composition::CompositionExecutor;
use cadence_procedure::ProcedureRegistry;
use cadence_workflow::{NodeKind, Workflow, WorkflowDefinition, WorkflowNode};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::filter::FilterCatalogue;
use crate::interpreter::{Flow, Run};
use crate::pause::{PauseState, TriggerEvent};
use crate::result::{ExecutionFailure, ExecutionResult, ExecutionStatus};
use crate::telemetry::{NoopTracer, Span, Tracer};

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Upper bound on nodes run by one call, guarding cyclic routing.
  pub max_steps: usize,
  /// Concurrency bound for parallel nodes and compositions that set none.
  pub default_max_concurrency: usize,
  /// How long after pausing a pause state stays usable.
  ///
  /// The consumed-pause ledger forgets a pause id once its state is older
  /// than this, and `resume`/`expire` reject such states as stale, so a
  /// forgotten id can never be replayed. Must exceed the longest wait an
  /// await node is expected to see.
  pub pause_retention: Duration,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_steps: 10_000,
      default_max_concurrency: 8,
      pause_retention: Duration::from_secs(30 * 24 * 60 * 60),
    }
  }
}

/// The workflow execution engine.
///
/// Holds no per-run state apart from the ledger of consumed pause states, so
/// one engine serves any number of concurrent executions.
pub struct Engine {
  pub(crate) registry: Arc<dyn ProcedureRegistry>,
  pub(crate) compositions: CompositionExecutor,
  pub(crate) filters: Arc<FilterCatalogue>,
  pub(crate) tracer: Arc<dyn Tracer>,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
  pub(crate) config: EngineConfig,
  /// Consumed pause ids and the time their state paused.
  consumed: Mutex<HashMap<String, DateTime<Utc>>>,
}

pub struct EngineBuilder {
  registry: Arc<dyn ProcedureRegistry>,
  filters: Option<Arc<FilterCatalogue>>,
  tracer: Arc<dyn Tracer>,
  notifier: Arc<dyn ExecutionNotifier>,
  config: EngineConfig,
}

impl EngineBuilder {
  /// Use a filter catalogue other than the built-in one.
  pub fn filters(mut self, filters: Arc<FilterCatalogue>) -> Self {
    self.filters = Some(filters);
    self
  }

  pub fn tracer(mut self, tracer: impl Tracer + 'static) -> Self {
    self.tracer = Arc::new(tracer);
    self
  }

  pub fn notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifier = Arc::new(notifier);
    self
  }

  pub fn config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Engine {
    let compositions = CompositionExecutor::new(self.registry.clone())
      .with_max_concurrency(self.config.default_max_concurrency);

    Engine {
      registry: self.registry,
      compositions,
      filters: self
        .filters
        .unwrap_or_else(|| Arc::new(FilterCatalogue::new())),
      tracer: self.tracer,
      notifier: self.notifier,
      config: self.config,
      consumed: Mutex::new(HashMap::new()),
    }
  }
}

impl Engine {
  /// An engine with built-in filters, no-op tracing and no-op notifications.
  pub fn new(registry: Arc<dyn ProcedureRegistry>) -> Self {
    Self::builder(registry).build()
  }

  pub fn builder(registry: Arc<dyn ProcedureRegistry>) -> EngineBuilder {
    EngineBuilder {
      registry,
      filters: None,
      tracer: Arc::new(NoopTracer),
      notifier: Arc::new(NoopNotifier),
      config: EngineConfig::default(),
    }
  }

  pub fn registry(&self) -> &Arc<dyn ProcedureRegistry> {
    &self.registry
  }

  pub fn filters(&self) -> &FilterCatalogue {
    &self.filters
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Execute a workflow from its start node.
  ///
  /// Returns `Err` only when the workflow is rejected before running.
  /// Everything that happens during the run is reported in the result.
  #[instrument(
    name = "workflow_execute",
    skip(self, workflow, input, cancel),
    fields(workflow_id = %workflow.id())
  )]
  pub async fn execute(
    &self,
    workflow: &Workflow,
    input: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<ExecutionResult, EngineError> {
    self.check_filters(workflow)?;

    let mut ctx = ExecutionContext::new(workflow, input);
    info!(execution_id = %ctx.execution_id, "workflow_started");
    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: ctx.execution_id.clone(),
      workflow_id: workflow.id().to_string(),
    });
    let span = self.start_run_span("workflow.execute", workflow, &ctx);

    let run = Run::new(self, workflow);
    let flow = run
      .walk(&mut ctx, workflow.start_node().to_string(), &cancel)
      .await;

    Ok(self.finish(workflow, ctx, flow, span))
  }

  /// Validate a definition and execute it.
  pub async fn execute_definition(
    &self,
    definition: WorkflowDefinition,
    input: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<ExecutionResult, EngineError> {
    let workflow = Workflow::new(definition)?;
    self.execute(&workflow, input, cancel).await
  }

  /// Resume a paused execution with a trigger event.
  ///
  /// The event must name a trigger the execution waits for and pass its
  /// filter. Rejected events leave the pause state usable; an accepted one
  /// consumes it. The event payload is merged into the variables and the run
  /// continues at the await node's successor.
  #[instrument(
    name = "workflow_resume",
    skip(self, workflow, pause_state, event, cancel),
    fields(
      workflow_id = %workflow.id(),
      execution_id = %pause_state.execution_id,
      trigger = %event.name,
    )
  )]
  pub async fn resume(
    &self,
    workflow: &Workflow,
    pause_state: PauseState,
    event: TriggerEvent,
    cancel: CancellationToken,
  ) -> Result<ExecutionResult, EngineError> {
    let node = self.check_resumable(workflow, &pause_state)?;

    if pause_state.is_expired(Utc::now()) {
      return Err(EngineError::Timeout {
        node_id: pause_state.paused_at.clone(),
      });
    }
    if !pause_state.is_waiting_for(&event.name) {
      return Err(EngineError::TriggerNotAwaited {
        node_id: pause_state.paused_at.clone(),
        trigger: event.name.clone(),
      });
    }
    if let Some(filter) = &pause_state.waiting_for.filter
      && !self.filters.evaluate(filter, &event.payload, &pause_state)?
    {
      return Err(EngineError::FilterRejected {
        node_id: pause_state.paused_at.clone(),
        filter_id: filter.id.clone(),
      });
    }

    self.consume(&pause_state)?;

    let mut ctx = ExecutionContext::restore(&pause_state);
    ctx.merge_variables(&event.payload);
    ctx
      .node_outputs
      .insert(pause_state.paused_at.clone(), event.payload.clone());

    info!(
      execution_id = %ctx.execution_id,
      node_id = %pause_state.paused_at,
      pause_id = %pause_state.pause_id,
      "workflow_resumed"
    );
    self.notifier.notify(ExecutionEvent::WorkflowResumed {
      execution_id: ctx.execution_id.clone(),
      node_id: pause_state.paused_at.clone(),
      trigger: event.name.clone(),
    });
    let span = self.start_run_span("workflow.resume", workflow, &ctx);

    let run = Run::new(self, workflow);
    let flow = match node.successor() {
      Some(next) => run.walk(&mut ctx, next.to_string(), &cancel).await,
      None => Flow::Completed,
    };

    Ok(self.finish(workflow, ctx, flow, span))
  }

  /// Time out a paused execution.
  ///
  /// Continues at the await node's `onTimeout` node with `variables.error`
  /// describing the timeout, or fails the run with a `TimeoutError` when no
  /// such node is configured. Consumes the pause state.
  #[instrument(
    name = "workflow_expire",
    skip(self, workflow, pause_state, cancel),
    fields(workflow_id = %workflow.id(), execution_id = %pause_state.execution_id)
  )]
  pub async fn expire(
    &self,
    workflow: &Workflow,
    pause_state: PauseState,
    now: DateTime<Utc>,
    cancel: CancellationToken,
  ) -> Result<ExecutionResult, EngineError> {
    self.check_resumable(workflow, &pause_state)?;

    if !pause_state.is_expired(now) {
      return Err(EngineError::NotExpired {
        pause_id: pause_state.pause_id.clone(),
      });
    }

    self.consume(&pause_state)?;

    let mut ctx = ExecutionContext::restore(&pause_state);
    let failure = ExecutionFailure::timeout(&pause_state.paused_at).at_node(&pause_state.paused_at);
    warn!(
      execution_id = %ctx.execution_id,
      node_id = %pause_state.paused_at,
      on_timeout = ?pause_state.on_timeout_node,
      "workflow_timed_out"
    );
    let span = self.start_run_span("workflow.expire", workflow, &ctx);

    let run = Run::new(self, workflow);
    let flow = match &pause_state.on_timeout_node {
      Some(target) => {
        ctx
          .variables
          .insert("error".to_string(), failure.to_value());
        run.walk(&mut ctx, target.clone(), &cancel).await
      }
      None => Flow::Failed(failure),
    };

    Ok(self.finish(workflow, ctx, flow, span))
  }

  /// Whether a pause state has already been resumed or expired by this engine.
  pub fn is_consumed(&self, pause_id: &str) -> bool {
    let consumed = self.consumed.lock().unwrap_or_else(|e| e.into_inner());
    consumed.contains_key(pause_id)
  }

  /// Number of pause ids currently held by the consumed ledger.
  pub fn consumed_count(&self) -> usize {
    self.consumed.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  /// Oldest `paused_at_time` still within the retention window at `now`.
  fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let retention = chrono::Duration::from_std(self.config.pause_retention).ok()?;
    now.checked_sub_signed(retention)
  }

  /// Reject workflows whose await nodes name filters this engine cannot run.
  fn check_filters(&self, workflow: &Workflow) -> Result<(), EngineError> {
    for node in workflow.nodes() {
      if let NodeKind::Await {
        filter: Some(filter),
        ..
      } = &node.kind
        && !self.filters.contains(&filter.id)
      {
        return Err(EngineError::UnknownFilter {
          node_id: node.id.clone(),
          filter_id: filter.id.clone(),
        });
      }
    }
    Ok(())
  }

  fn check_resumable<'w>(
    &self,
    workflow: &'w Workflow,
    pause_state: &PauseState,
  ) -> Result<&'w WorkflowNode, EngineError> {
    if pause_state.workflow_id != workflow.id() {
      return Err(EngineError::WorkflowMismatch {
        expected: workflow.id().to_string(),
        actual: pause_state.workflow_id.clone(),
      });
    }

    if self.is_consumed(&pause_state.pause_id) {
      return Err(EngineError::PauseStateConsumed {
        pause_id: pause_state.pause_id.clone(),
      });
    }

    if let Some(cutoff) = self.retention_cutoff(Utc::now())
      && pause_state.paused_at_time < cutoff
    {
      return Err(EngineError::StalePauseState {
        pause_id: pause_state.pause_id.clone(),
      });
    }

    match workflow.get_node(&pause_state.paused_at) {
      Some(node) if matches!(node.kind, NodeKind::Await { .. }) => Ok(node),
      _ => Err(EngineError::UnknownPauseNode {
        node_id: pause_state.paused_at.clone(),
      }),
    }
  }

  /// Mark a pause state as used. Fails if another call got there first.
  ///
  /// Ids of states past the retention window are dropped on the way; such
  /// states are already rejected as stale.
  fn consume(&self, pause_state: &PauseState) -> Result<(), EngineError> {
    let mut consumed = self.consumed.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(cutoff) = self.retention_cutoff(Utc::now()) {
      let before = consumed.len();
      consumed.retain(|_, paused_at| *paused_at >= cutoff);
      let pruned = before - consumed.len();
      if pruned > 0 {
        debug!(pruned, remaining = consumed.len(), "consumed_ledger_pruned");
      }
    }

    if consumed.contains_key(&pause_state.pause_id) {
      return Err(EngineError::PauseStateConsumed {
        pause_id: pause_state.pause_id.clone(),
      });
    }
    consumed.insert(pause_state.pause_id.clone(), pause_state.paused_at_time);
    Ok(())
  }

  fn start_run_span(
    &self,
    name: &str,
    workflow: &Workflow,
    ctx: &ExecutionContext,
  ) -> Box<dyn Span> {
    self.tracer.start_span(
      name,
      serde_json::json!({
        "workflowId": workflow.id(),
        "workflowVersion": workflow.version(),
        "executionId": ctx.execution_id,
      }),
    )
  }

  /// Turn the end of a walk into a result, emitting the terminal event.
  fn finish(
    &self,
    workflow: &Workflow,
    ctx: ExecutionContext,
    flow: Flow,
    mut span: Box<dyn Span>,
  ) -> ExecutionResult {
    let execution_id = ctx.execution_id.clone();

    let (status, error, resume_state) = match flow {
      Flow::Completed => {
        info!(
          execution_id = %execution_id,
          nodes_executed = ctx.nodes_executed.len(),
          "workflow_completed"
        );
        self.notifier.notify(ExecutionEvent::WorkflowCompleted {
          execution_id: execution_id.clone(),
        });
        (ExecutionStatus::Completed, None, None)
      }
      Flow::Failed(failure) => {
        error!(
          execution_id = %execution_id,
          error_name = %failure.name,
          error = %failure.message,
          node_id = ?failure.node_id,
          "workflow_failed"
        );
        span.record_exception(&failure.message);
        self.notifier.notify(ExecutionEvent::WorkflowFailed {
          execution_id: execution_id.clone(),
          error: failure.message.clone(),
        });
        (ExecutionStatus::Failed, Some(failure), None)
      }
      Flow::Cancelled => {
        warn!(execution_id = %execution_id, "workflow_cancelled");
        self.notifier.notify(ExecutionEvent::WorkflowCancelled {
          execution_id: execution_id.clone(),
        });
        (ExecutionStatus::Cancelled, None, None)
      }
      Flow::Paused(suspension) => {
        let pause_state = PauseState {
          pause_id: uuid::Uuid::new_v4().to_string(),
          execution_id: execution_id.clone(),
          workflow_id: workflow.id().to_string(),
          workflow_version: workflow.version().to_string(),
          paused_at: suspension.node_id,
          waiting_for: suspension.waiting_for,
          variables: ctx.variables.clone(),
          node_outputs: ctx.node_outputs.clone(),
          nodes_executed: ctx.nodes_executed.clone(),
          errors: ctx.errors.clone(),
          paused_at_time: Utc::now(),
          timeout_at: suspension.timeout_at,
          on_timeout_node: suspension.on_timeout,
        };
        info!(
          execution_id = %execution_id,
          node_id = %pause_state.paused_at,
          pause_id = %pause_state.pause_id,
          waiting_for = ?pause_state.waiting_for.procedures,
          "workflow_paused"
        );
        self.notifier.notify(ExecutionEvent::WorkflowPaused {
          execution_id: execution_id.clone(),
          node_id: pause_state.paused_at.clone(),
          pause_id: pause_state.pause_id.clone(),
        });
        (ExecutionStatus::Paused, None, Some(pause_state))
      }
    };

    span.set_attributes(serde_json::json!({ "status": status }));
    span.end();

    let execution_time_ms = ctx.elapsed_ms();
    ExecutionResult {
      execution_id,
      workflow_id: ctx.workflow_id,
      status,
      nodes_executed: ctx.nodes_executed,
      outputs: ctx.variables,
      node_outputs: ctx.node_outputs,
      errors: ctx.errors,
      error,
      resume_state,
      execution_time_ms,
    }
  }
}
