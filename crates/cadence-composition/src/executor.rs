//! Composition executor.

use std::sync::Arc;
use std::time::Duration;

use cadence_procedure::{HandlerError, Procedure, ProcedureContext, ProcedureRegistry};
use cadence_workflow::{ErrorHandling, ParallelConfig};
use futures::StreamExt;
use tracing::{error, info, instrument, warn};

use crate::config::{CompositionConfig, CompositionType};
use crate::error::CompositionError;
use crate::trace::{CompositionOutput, CompositionTrace};

/// Default bound on concurrently running parallel members.
const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Why a strategy stopped early.
enum Failure {
  Step { step: String, error: HandlerError },
  Cancelled,
}

type StrategyResult = Result<serde_json::Value, Failure>;

/// Runs compositions against procedures resolved from a registry.
#[derive(Clone)]
pub struct CompositionExecutor {
  registry: Arc<dyn ProcedureRegistry>,
  default_max_concurrency: usize,
}

impl CompositionExecutor {
  pub fn new(registry: Arc<dyn ProcedureRegistry>) -> Self {
    Self {
      registry,
      default_max_concurrency: DEFAULT_MAX_CONCURRENCY,
    }
  }

  /// Bound used when a parallel composition does not set `maxConcurrency`.
  pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
    self.default_max_concurrency = max_concurrency.max(1);
    self
  }

  /// Resolve the members (and fallback) of a composition from the registry.
  pub fn resolve(
    &self,
    config: &CompositionConfig,
  ) -> Result<(Vec<Procedure>, Option<Procedure>), CompositionError> {
    let members = config
      .procedures
      .iter()
      .map(|name| {
        self
          .registry
          .get(name)
          .ok_or_else(|| CompositionError::ProcedureNotFound(name.clone()))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let fallback = match &config.fallback_procedure_name {
      Some(name) if config.effective_type() == CompositionType::Fallback => Some(
        self
          .registry
          .get(name)
          .ok_or_else(|| CompositionError::ProcedureNotFound(name.clone()))?,
      ),
      _ => None,
    };

    Ok((members, fallback))
  }

  /// Run a composition, resolving its members from the registry.
  pub async fn run(
    &self,
    config: &CompositionConfig,
    input: serde_json::Value,
    ctx: &ProcedureContext,
  ) -> Result<CompositionOutput, CompositionError> {
    config.validate()?;
    let (members, fallback) = self.resolve(config)?;
    self
      .run_with_members(config, &members, fallback.as_ref(), input, ctx)
      .await
  }

  /// Run a composition against already resolved member procedures.
  #[instrument(
    name = "composition_run",
    skip(self, config, members, fallback, input, ctx),
    fields(
      composition = %config.name,
      execution_id = %ctx.execution_id,
    )
  )]
  pub async fn run_with_members(
    &self,
    config: &CompositionConfig,
    members: &[Procedure],
    fallback: Option<&Procedure>,
    input: serde_json::Value,
    ctx: &ProcedureContext,
  ) -> Result<CompositionOutput, CompositionError> {
    let strategy = config.effective_type();
    info!(strategy = ?strategy, members = members.len(), "composition_started");

    let mut trace = CompositionTrace::default();
    let result = match strategy {
      CompositionType::Sequential => {
        sequential(members, input, ctx, config.error_handling, &mut trace).await
      }
      CompositionType::Parallel => {
        let limit = config
          .parallel_config
          .max_concurrency
          .unwrap_or(self.default_max_concurrency);
        parallel(
          members,
          input,
          ctx,
          &config.parallel_config,
          limit,
          config.error_handling,
          &mut trace,
        )
        .await
      }
      CompositionType::Conditional => {
        let Some(expression) = &config.condition_expression else {
          return Err(CompositionError::InvalidConfig {
            name: config.name.clone(),
            message: "conditional composition requires conditionExpression".to_string(),
          });
        };
        let holds = expression
          .is_truthy(&scope_of(&input))
          .map_err(|source| CompositionError::Expression {
            name: config.name.clone(),
            source,
          })?;
        if holds {
          sequential(&members[..members.len().min(1)], input, ctx, ErrorHandling::Stop, &mut trace).await
        } else {
          info!("condition false, skipping");
          Ok(input)
        }
      }
      CompositionType::Retry => retry(config, members, input, ctx, &mut trace).await,
      CompositionType::Fallback => {
        let Some(fallback) = fallback else {
          return Err(CompositionError::InvalidConfig {
            name: config.name.clone(),
            message: "fallback procedure not resolved".to_string(),
          });
        };
        with_fallback(members, fallback, input, ctx, &mut trace).await
      }
    };

    match result {
      Ok(result) => {
        info!(
          steps = trace.steps_executed.len(),
          errors = trace.errors.len(),
          "composition_completed"
        );
        Ok(CompositionOutput { result, trace })
      }
      Err(Failure::Step { step, error: source }) => {
        error!(step = %step, error = %source, "composition_failed");
        Err(CompositionError::StepFailed {
          name: config.name.clone(),
          step,
          source,
          trace,
        })
      }
      Err(Failure::Cancelled) => {
        warn!("composition cancelled");
        Err(CompositionError::Cancelled(config.name.clone()))
      }
    }
  }
}

/// Variables visible to a condition: the input object, or `{ "input": value }`.
fn scope_of(input: &serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
  match input {
    serde_json::Value::Object(map) => map.clone(),
    other => serde_json::Map::from_iter([("input".to_string(), other.clone())]),
  }
}

/// Thread each step's output into the next step.
///
/// With `Continue`, a failed step is skipped and the last successful value
/// keeps flowing forward.
async fn sequential(
  members: &[Procedure],
  input: serde_json::Value,
  ctx: &ProcedureContext,
  error_handling: ErrorHandling,
  trace: &mut CompositionTrace,
) -> StrategyResult {
  let mut current = input;

  for procedure in members {
    if ctx.is_cancelled() {
      return Err(Failure::Cancelled);
    }

    let step = procedure.name();
    trace.started(step);

    let outcome = tokio::select! {
      outcome = procedure.invoke(current.clone(), ctx) => outcome,
      _ = ctx.cancel.cancelled() => return Err(Failure::Cancelled),
    };

    match outcome {
      Ok(output) => {
        trace.succeeded(step, &output);
        current = output;
      }
      Err(e) => {
        trace.failed(step, &e);
        if error_handling == ErrorHandling::Continue {
          warn!(step = %step, error = %e, "step failed, continuing");
          continue;
        }
        return Err(Failure::Step {
          step: step.to_string(),
          error: e,
        });
      }
    }
  }

  Ok(current)
}

/// Run every member with the same input, at most `limit` at a time.
///
/// Join mode merges object outputs in declared order. Race mode returns the
/// first success and cancels the members still in flight.
async fn parallel(
  members: &[Procedure],
  input: serde_json::Value,
  ctx: &ProcedureContext,
  parallel_config: &ParallelConfig,
  limit: usize,
  error_handling: ErrorHandling,
  trace: &mut CompositionTrace,
) -> StrategyResult {
  let race_cancel = ctx.cancel.child_token();
  let member_ctx = ctx.clone().with_cancel(race_cancel.clone());

  let member_ctx = &member_ctx;
  let shared_input = &input;

  let member_futures: Vec<_> = members
    .iter()
    .enumerate()
    .map(move |(index, procedure)| {
      let input = shared_input.clone();
      async move { (index, procedure.invoke(input, member_ctx).await) }
    })
    .collect();
  let mut in_flight =
    std::pin::pin!(futures::stream::iter(member_futures).buffer_unordered(limit.max(1)));

  let mut outputs: Vec<Option<serde_json::Value>> = vec![None; members.len()];
  let mut last_error: Option<Failure> = None;

  loop {
    let next = tokio::select! {
      next = in_flight.next() => next,
      _ = ctx.cancel.cancelled() => return Err(Failure::Cancelled),
    };
    let Some((index, outcome)) = next else {
      break;
    };

    let step = members[index].name();
    trace.started(step);

    match outcome {
      Ok(output) => {
        trace.succeeded(step, &output);
        if !parallel_config.wait_for_all {
          race_cancel.cancel();
          return Ok(output);
        }
        outputs[index] = Some(output);
      }
      Err(e) => {
        trace.failed(step, &e);
        let failure = Failure::Step {
          step: step.to_string(),
          error: e,
        };
        if parallel_config.wait_for_all && error_handling != ErrorHandling::Continue {
          race_cancel.cancel();
          return Err(failure);
        }
        last_error = Some(failure);
      }
    }
  }

  if !parallel_config.wait_for_all {
    // Every racer failed.
    return Err(last_error.unwrap_or(Failure::Cancelled));
  }

  let mut merged = serde_json::Map::new();
  for (procedure, output) in members.iter().zip(outputs) {
    match output {
      Some(serde_json::Value::Object(map)) => merged.extend(map),
      Some(other) => {
        merged.insert(procedure.name().to_string(), other);
      }
      None => {}
    }
  }
  Ok(serde_json::Value::Object(merged))
}

/// Re-run the sequential chain until it succeeds or attempts run out.
async fn retry(
  config: &CompositionConfig,
  members: &[Procedure],
  input: serde_json::Value,
  ctx: &ProcedureContext,
  trace: &mut CompositionTrace,
) -> StrategyResult {
  let retry_config = &config.retry_config;
  let max_attempts = retry_config.max_attempts.max(1);
  let mut delay_ms = retry_config.delay_ms as f64;
  let mut attempt = 1u32;

  loop {
    match sequential(members, input.clone(), ctx, ErrorHandling::Stop, trace).await {
      Ok(output) => return Ok(output),
      Err(Failure::Cancelled) => return Err(Failure::Cancelled),
      Err(failure) if attempt >= max_attempts => return Err(failure),
      Err(Failure::Step { step, error }) => {
        warn!(
          step = %step,
          error = %error,
          attempt,
          max_attempts,
          delay_ms = delay_ms as u64,
          "attempt failed, retrying"
        );

        tokio::select! {
          _ = tokio::time::sleep(Duration::from_millis(delay_ms as u64)) => {}
          _ = ctx.cancel.cancelled() => return Err(Failure::Cancelled),
        }

        delay_ms *= retry_config.backoff_multiplier;
        attempt = attempt.saturating_add(1);
      }
    }
  }
}

/// Run the primary chain; on failure run the fallback once with the original input.
async fn with_fallback(
  members: &[Procedure],
  fallback: &Procedure,
  input: serde_json::Value,
  ctx: &ProcedureContext,
  trace: &mut CompositionTrace,
) -> StrategyResult {
  match sequential(members, input.clone(), ctx, ErrorHandling::Stop, trace).await {
    Ok(output) => Ok(output),
    Err(Failure::Cancelled) => Err(Failure::Cancelled),
    Err(Failure::Step { step, error }) => {
      warn!(step = %step, error = %error, fallback = %fallback.name(), "running fallback");
      sequential(
        std::slice::from_ref(fallback),
        input,
        ctx,
        ErrorHandling::Stop,
        trace,
      )
      .await
    }
  }
}
