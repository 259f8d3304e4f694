//! Node interpreter.
//!
//! Walks a workflow from a start node, dispatching each node by type, until
//! the chain ends, an await node suspends it, or a failure is not routed.

use std::sync::atomic::{AtomicUsize, Ordering};

use cadence_composition::{CompositionConfig, CompositionError, CompositionType};
use cadence_procedure::ProcedureContext;
use cadence_workflow::{NodeKind, ParallelConfig, Workflow, WorkflowNode};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::ExecutionContext;
use crate::engine::Engine;
use crate::events::ExecutionEvent;
use crate::pause::WaitingFor;
use crate::result::ExecutionFailure;

/// Where a walk stopped.
pub(crate) enum Flow {
  Completed,
  Paused(Suspension),
  Failed(ExecutionFailure),
  Cancelled,
}

/// An await node reached during a walk.
pub(crate) struct Suspension {
  pub node_id: String,
  pub waiting_for: WaitingFor,
  pub timeout_at: Option<DateTime<Utc>>,
  pub on_timeout: Option<String>,
}

/// Outcome of a single node.
pub(crate) enum Step {
  Next(Option<String>),
  Pause(Suspension),
  Fail(ExecutionFailure),
  Cancelled,
}

/// One `execute`/`resume`/`expire` call in progress.
///
/// Parallel branches share the run (and its step budget) but each walks its
/// own [`ExecutionContext`].
pub(crate) struct Run<'a> {
  pub engine: &'a Engine,
  pub workflow: &'a Workflow,
  steps: AtomicUsize,
}

impl<'a> Run<'a> {
  pub fn new(engine: &'a Engine, workflow: &'a Workflow) -> Self {
    Self {
      engine,
      workflow,
      steps: AtomicUsize::new(0),
    }
  }

  /// Walk the chain starting at `start`.
  pub fn walk<'b>(
    &'b self,
    ctx: &'b mut ExecutionContext,
    start: String,
    cancel: &'b CancellationToken,
  ) -> BoxFuture<'b, Flow> {
    async move {
      let mut current = Some(start);

      while let Some(node_id) = current.take() {
        if cancel.is_cancelled() {
          return Flow::Cancelled;
        }

        let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if steps > self.engine.config.max_steps {
          return Flow::Failed(
            ExecutionFailure::new(
              "StepLimitExceeded",
              format!(
                "execution exceeded {} node steps",
                self.engine.config.max_steps
              ),
            )
            .at_node(&node_id),
          );
        }

        let Some(node) = self.workflow.get_node(&node_id) else {
          return Flow::Failed(ExecutionFailure::new(
            "ValidationError",
            format!("node '{}' not found in workflow", node_id),
          ));
        };

        match self.step(node, ctx, cancel).await {
          Step::Next(next) => current = next,
          Step::Pause(suspension) => return Flow::Paused(suspension),
          Step::Cancelled => return Flow::Cancelled,
          Step::Fail(mut failure) => {
            if failure.node_id.is_none() {
              failure.node_id = Some(node.id.clone());
            }
            match &node.on_error {
              Some(target) => {
                warn!(
                  execution_id = %ctx.execution_id,
                  node_id = %node.id,
                  on_error = %target,
                  error = %failure.message,
                  "routing failure to error handler"
                );
                ctx
                  .variables
                  .insert("error".to_string(), failure.to_value());
                current = Some(target.clone());
              }
              None => return Flow::Failed(failure),
            }
          }
        }
      }

      Flow::Completed
    }
    .boxed()
  }

  /// Run one node with its events, logs and span.
  async fn step(
    &self,
    node: &WorkflowNode,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
  ) -> Step {
    let execution_id = ctx.execution_id.clone();
    info!(
      execution_id = %execution_id,
      node_id = %node.id,
      node_type = node.kind_name(),
      "node_started"
    );
    self.engine.notifier.notify(ExecutionEvent::NodeStarted {
      execution_id: execution_id.clone(),
      node_id: node.id.clone(),
    });
    ctx.nodes_executed.push(node.id.clone());

    let mut span = self.engine.tracer.start_span(
      "workflow.node",
      serde_json::json!({
        "executionId": execution_id,
        "nodeId": node.id,
        "nodeType": node.kind_name(),
      }),
    );

    let step = self.dispatch(node, ctx, cancel).await;

    match &step {
      Step::Next(next) => {
        info!(
          execution_id = %execution_id,
          node_id = %node.id,
          next = ?next,
          "node_completed"
        );
        self.engine.notifier.notify(ExecutionEvent::NodeCompleted {
          execution_id,
          node_id: node.id.clone(),
          data: ctx
            .node_outputs
            .get(&node.id)
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        });
      }
      Step::Fail(failure) => {
        error!(
          execution_id = %execution_id,
          node_id = %node.id,
          error_name = %failure.name,
          error = %failure.message,
          "node_failed"
        );
        span.record_exception(&failure.message);
        self.engine.notifier.notify(ExecutionEvent::NodeFailed {
          execution_id,
          node_id: node.id.clone(),
          error: failure.message.clone(),
        });
      }
      Step::Pause(_) | Step::Cancelled => {}
    }

    span.end();
    step
  }

  async fn dispatch(
    &self,
    node: &WorkflowNode,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
  ) -> Step {
    match &node.kind {
      NodeKind::Procedure { procedure_name } => {
        self.run_procedure(node, procedure_name, ctx, cancel).await
      }

      NodeKind::Condition {
        condition,
        true_branch,
        false_branch,
      } => match condition.is_truthy(&ctx.variables) {
        Ok(holds) => {
          debug!(node_id = %node.id, condition = %condition.as_str(), holds, "condition_evaluated");
          ctx
            .node_outputs
            .insert(node.id.clone(), serde_json::Value::Bool(holds));
          let branch = if holds { true_branch } else { false_branch };
          Step::Next(branch.clone().or_else(|| successor(node)))
        }
        Err(e) => Step::Fail(ExecutionFailure::new("ExpressionError", e.to_string())),
      },

      NodeKind::Switch {
        selector,
        cases,
        default_branch,
      } => {
        let input = node_input(node, ctx);
        match selector.discriminant(&input) {
          Ok(discriminant) => {
            let branch = discriminant
              .as_ref()
              .and_then(|d| cases.get(d))
              .or(default_branch.as_ref());
            debug!(
              node_id = %node.id,
              discriminant = ?discriminant,
              target = ?branch.map(|b| b.target()),
              "switch_evaluated"
            );
            ctx.node_outputs.insert(
              node.id.clone(),
              discriminant
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
            );
            Step::Next(
              branch
                .map(|b| b.target().to_string())
                .or_else(|| successor(node)),
            )
          }
          Err(e) => Step::Fail(ExecutionFailure::new("ExpressionError", e.to_string())),
        }
      }

      NodeKind::Parallel { .. } => self.run_parallel(node, ctx, cancel).await,

      NodeKind::Sequential {
        procedures,
        error_handling,
        retry_config,
        fallback_procedure_name,
      } => {
        let config = CompositionConfig {
          name: node.id.clone(),
          composition_type: CompositionType::Sequential,
          procedures: procedures.clone(),
          error_handling: *error_handling,
          retry_config: retry_config.clone().unwrap_or_default(),
          fallback_procedure_name: fallback_procedure_name.clone(),
          condition_expression: None,
          parallel_config: ParallelConfig::default(),
        };
        self.run_composition(node, &config, ctx, cancel).await
      }

      NodeKind::Await {
        filter,
        timeout,
        on_timeout,
        ..
      } => {
        let timeout_at = timeout.as_ref().and_then(|t| {
          let ms = i64::try_from(t.duration_ms).ok()?;
          Utc::now().checked_add_signed(chrono::Duration::try_milliseconds(ms)?)
        });

        Step::Pause(Suspension {
          node_id: node.id.clone(),
          waiting_for: WaitingFor {
            procedures: node.trigger_names(),
            filter: filter.clone(),
          },
          timeout_at,
          on_timeout: on_timeout.clone(),
        })
      }
    }
  }

  async fn run_procedure(
    &self,
    node: &WorkflowNode,
    procedure_name: &str,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
  ) -> Step {
    let Some(procedure) = self.engine.registry.get(procedure_name) else {
      return Step::Fail(ExecutionFailure::procedure_not_found(procedure_name));
    };

    let input = serde_json::Value::Object(node_input(node, ctx));
    let procedure_ctx = self.procedure_context(node, ctx, cancel);

    let outcome = tokio::select! {
      outcome = procedure.invoke(input, &procedure_ctx) => outcome,
      _ = cancel.cancelled() => return Step::Cancelled,
    };

    match outcome {
      Ok(output) => {
        ctx.record_output(&node.id, output);
        Step::Next(successor(node))
      }
      Err(e) => Step::Fail(e.into()),
    }
  }

  async fn run_composition(
    &self,
    node: &WorkflowNode,
    config: &CompositionConfig,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
  ) -> Step {
    let input = serde_json::Value::Object(node_input(node, ctx));
    let procedure_ctx = self.procedure_context(node, ctx, cancel);

    let outcome = tokio::select! {
      outcome = self.engine.compositions.run(config, input, &procedure_ctx) => outcome,
      _ = cancel.cancelled() => return Step::Cancelled,
    };

    match outcome {
      Ok(output) => {
        ctx.errors.extend(output.trace.errors);
        ctx.record_output(&node.id, output.result);
        Step::Next(successor(node))
      }
      Err(CompositionError::Cancelled(_)) => Step::Cancelled,
      Err(e) => {
        if let Some(trace) = e.trace() {
          ctx.errors.extend(trace.errors.iter().cloned());
        }
        Step::Fail(e.into())
      }
    }
  }

  fn procedure_context(
    &self,
    node: &WorkflowNode,
    ctx: &ExecutionContext,
    cancel: &CancellationToken,
  ) -> ProcedureContext {
    ProcedureContext::new(ctx.execution_id.clone())
      .with_workflow(ctx.workflow_id.clone())
      .with_node(node.id.clone())
      .with_cancel(cancel.clone())
  }
}

/// Handler input: the node's config overlaid by the current variables.
pub(crate) fn node_input(
  node: &WorkflowNode,
  ctx: &ExecutionContext,
) -> serde_json::Map<String, serde_json::Value> {
  let mut input = node.config.clone();
  for (key, value) in &ctx.variables {
    input.insert(key.clone(), value.clone());
  }
  input
}

pub(crate) fn successor(node: &WorkflowNode) -> Option<String> {
  node.successor().map(str::to_string)
}
