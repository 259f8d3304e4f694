use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cadence_engine::{Engine, ExecutionResult, PauseState, TriggerEvent};
use cadence_workflow::Workflow;

mod procedures;

/// Cadence - a workflow engine that can pause for external events
#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.cadence)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow with a JSON payload read from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Resume a paused execution with a trigger event read from stdin
  Resume {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Id of the paused execution
    #[arg(long)]
    execution: String,

    /// Name of the trigger the event was emitted under
    #[arg(long)]
    trigger: String,
  },

  /// Expire a paused execution whose timeout has passed
  Expire {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Id of the paused execution
    #[arg(long)]
    execution: String,
  },

  /// Check a workflow definition without running it
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".cadence"),
  };

  match cli.command {
    Some(Commands::Run { workflow_file }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_workflow(workflow_file, data_dir))?;
    }
    Some(Commands::Resume {
      workflow_file,
      execution,
      trigger,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(resume_workflow(workflow_file, execution, trigger, data_dir))?;
    }
    Some(Commands::Expire {
      workflow_file,
      execution,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(expire_workflow(workflow_file, execution, data_dir))?;
    }
    Some(Commands::Validate { workflow_file }) => {
      validate_workflow(&workflow_file)?;
    }
    None => {
      println!("cadence - use --help to see available commands");
    }
  }

  Ok(())
}

fn engine() -> Result<Engine> {
  let registry = procedures::builtin_registry().context("failed to register built-in procedures")?;
  Ok(Engine::new(registry))
}

async fn run_workflow(workflow_file: PathBuf, data_dir: PathBuf) -> Result<()> {
  let workflow = load_workflow(&workflow_file).await?;
  eprintln!("Loaded workflow: {}", workflow.name());

  let payload = read_payload_from_stdin()?;

  let result = engine()?
    .execute(&workflow, payload, shutdown_token())
    .await
    .context("workflow rejected")?;

  report(&result, &data_dir).await
}

async fn resume_workflow(
  workflow_file: PathBuf,
  execution_id: String,
  trigger: String,
  data_dir: PathBuf,
) -> Result<()> {
  let workflow = load_workflow(&workflow_file).await?;
  let pause_state = load_pause_state(&data_dir, &execution_id).await?;

  let payload = read_payload_from_stdin()?;
  let event = TriggerEvent::new(trigger, payload);

  let result = engine()?
    .resume(&workflow, pause_state, event, shutdown_token())
    .await
    .context("resume rejected")?;

  remove_pause_state(&data_dir, &execution_id).await?;
  report(&result, &data_dir).await
}

async fn expire_workflow(workflow_file: PathBuf, execution_id: String, data_dir: PathBuf) -> Result<()> {
  let workflow = load_workflow(&workflow_file).await?;
  let pause_state = load_pause_state(&data_dir, &execution_id).await?;

  let result = engine()?
    .expire(&workflow, pause_state, chrono::Utc::now(), shutdown_token())
    .await
    .context("expire rejected")?;

  remove_pause_state(&data_dir, &execution_id).await?;
  report(&result, &data_dir).await
}

fn validate_workflow(workflow_file: &Path) -> Result<()> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  let workflow = Workflow::from_json(&content)
    .with_context(|| format!("invalid workflow: {}", workflow_file.display()))?;

  let graph = workflow.graph();
  for node_id in graph.unreachable() {
    eprintln!("warning: node '{}' is unreachable from '{}'", node_id, workflow.start_node());
  }

  println!("{} ({}) is valid", workflow.id(), workflow.version());
  Ok(())
}

/// Print the result and keep the pause state on disk if the run paused.
async fn report(result: &ExecutionResult, data_dir: &Path) -> Result<()> {
  eprintln!(
    "Execution {}: {:?} after {} nodes",
    result.execution_id,
    result.status,
    result.nodes_executed.len()
  );

  if let Some(pause_state) = &result.resume_state {
    let path = save_pause_state(data_dir, pause_state).await?;
    eprintln!(
      "Waiting for {:?}; state saved to {}",
      pause_state.waiting_for.procedures,
      path.display()
    );
  }

  println!("{}", serde_json::to_string_pretty(result)?);

  if result.is_failed() {
    bail!("workflow failed");
  }
  Ok(())
}

async fn load_workflow(workflow_file: &Path) -> Result<Workflow> {
  let content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  Workflow::from_json(&content)
    .with_context(|| format!("failed to load workflow file: {}", workflow_file.display()))
}

fn pause_state_path(data_dir: &Path, execution_id: &str) -> PathBuf {
  data_dir.join("paused").join(format!("{}.json", execution_id))
}

async fn save_pause_state(data_dir: &Path, pause_state: &PauseState) -> Result<PathBuf> {
  let path = pause_state_path(data_dir, &pause_state.execution_id);
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }

  let content = serde_json::to_string_pretty(pause_state)?;
  tokio::fs::write(&path, content)
    .await
    .with_context(|| format!("failed to write pause state: {}", path.display()))?;
  Ok(path)
}

async fn load_pause_state(data_dir: &Path, execution_id: &str) -> Result<PauseState> {
  let path = pause_state_path(data_dir, execution_id);
  let content = tokio::fs::read_to_string(&path)
    .await
    .with_context(|| format!("no paused execution '{}' at {}", execution_id, path.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse pause state: {}", path.display()))
}

// A file on disk is the only record that a state is still usable across
// processes, so an accepted resume or expiry removes it.
async fn remove_pause_state(data_dir: &Path, execution_id: &str) -> Result<()> {
  let path = pause_state_path(data_dir, execution_id);
  match tokio::fs::remove_file(&path).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
  }
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      token.cancel();
    }
  });
  cancel
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
