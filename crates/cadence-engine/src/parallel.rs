//! Parallel node: concurrent branch walks joined at the node.

use cadence_composition::StepError;
use cadence_workflow::{ErrorHandling, MergeStrategy, NodeKind, WorkflowNode};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::ExecutionContext;
use crate::interpreter::{Flow, Run, Step, successor};
use crate::result::ExecutionFailure;

impl Run<'_> {
  /// Walk every branch to its end, at most `maxConcurrency` at a time.
  ///
  /// Branches run inside the calling task on copies of the variables, so they
  /// never observe each other's writes. With `waitForAll` the outputs of the
  /// successful branches are merged in declared order; otherwise the first
  /// branch to succeed wins and the rest are cancelled and dropped.
  pub(crate) async fn run_parallel(
    &self,
    node: &WorkflowNode,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
  ) -> Step {
    let NodeKind::Parallel {
      branches,
      parallel,
      error_handling,
      merge,
    } = &node.kind
    else {
      return Step::Fail(ExecutionFailure::new(
        "ValidationError",
        format!("node '{}' is not a parallel node", node.id),
      ));
    };

    let limit = parallel
      .max_concurrency
      .unwrap_or(self.engine.config.default_max_concurrency)
      .max(1);
    let branch_cancel = cancel.child_token();
    let branch_cancel_ref = &branch_cancel;
    let branch_contexts: Vec<ExecutionContext> = branches.iter().map(|_| ctx.branch()).collect();

    let branch_futures: Vec<_> = branches
      .iter()
      .zip(branch_contexts)
      .enumerate()
      .map(move |(index, (branch_id, mut branch_ctx))| async move {
        let flow = self
          .walk(&mut branch_ctx, branch_id.clone(), branch_cancel_ref)
          .await;
        (index, flow, branch_ctx)
      })
      .collect();
    let mut in_flight =
      std::pin::pin!(futures::stream::iter(branch_futures).buffer_unordered(limit));

    let mut outputs: Vec<Option<serde_json::Value>> = vec![None; branches.len()];
    let mut first_failure: Option<ExecutionFailure> = None;

    loop {
      let next = tokio::select! {
        next = in_flight.next() => next,
        _ = cancel.cancelled() => return Step::Cancelled,
      };
      let Some((index, flow, branch_ctx)) = next else {
        break;
      };
      let branch_id = &branches[index];

      let failure = match flow {
        Flow::Completed => {
          let output = branch_ctx.branch_output();
          ctx.absorb_history(branch_ctx);

          if !parallel.wait_for_all {
            branch_cancel.cancel();
            info!(
              execution_id = %ctx.execution_id,
              node_id = %node.id,
              winner = %branch_id,
              "parallel_race_won"
            );
            return join(node, ctx, vec![(branch_id.as_str(), output)], *merge);
          }
          outputs[index] = Some(output);
          continue;
        }
        Flow::Cancelled => {
          if cancel.is_cancelled() {
            return Step::Cancelled;
          }
          continue;
        }
        Flow::Paused(suspension) => ExecutionFailure::new(
          "ValidationError",
          format!(
            "await node '{}' cannot suspend inside parallel branch '{}'",
            suspension.node_id, branch_id
          ),
        ),
        Flow::Failed(failure) => failure,
      };

      warn!(
        execution_id = %ctx.execution_id,
        node_id = %node.id,
        branch = %branch_id,
        error = %failure.message,
        "parallel_branch_failed"
      );
      ctx.absorb_history(branch_ctx);
      ctx
        .errors
        .push(StepError::new(branch_id.clone(), failure.message.clone()));

      if parallel.wait_for_all && *error_handling != ErrorHandling::Continue {
        branch_cancel.cancel();
        return Step::Fail(failure);
      }
      first_failure.get_or_insert(failure);
    }

    if !parallel.wait_for_all {
      return Step::Fail(first_failure.unwrap_or_else(|| {
        ExecutionFailure::new("CompositionError", "no parallel branch succeeded")
      }));
    }

    let settled = branches
      .iter()
      .zip(outputs)
      .filter_map(|(branch_id, output)| output.map(|output| (branch_id.as_str(), output)))
      .collect();
    join(node, ctx, settled, *merge)
  }
}

/// Merge branch outputs into the node output and the variables.
fn join(
  node: &WorkflowNode,
  ctx: &mut ExecutionContext,
  outputs: Vec<(&str, serde_json::Value)>,
  merge: MergeStrategy,
) -> Step {
  let mut merged = serde_json::Map::new();

  for (branch_id, output) in outputs {
    match (merge, output) {
      (MergeStrategy::Flat, serde_json::Value::Object(map)) => {
        for (key, value) in map {
          if merged.contains_key(&key) {
            warn!(
              node_id = %node.id,
              branch = %branch_id,
              key = %key,
              "parallel_merge_collision"
            );
          }
          merged.insert(key, value);
        }
      }
      (_, output) => {
        merged.insert(branch_id.to_string(), output);
      }
    }
  }

  ctx.record_output(&node.id, serde_json::Value::Object(merged));
  Step::Next(successor(node))
}
