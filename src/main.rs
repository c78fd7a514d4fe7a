use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use trellis_engine::GraphCoordinator;
use trellis_expression::{EvaluatorRegistry, JinjaConfig, JinjaEvaluator};
use trellis_graph::{State, WorkflowGraph};

/// Trellis - inspect and drive workflow graphs
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Evaluation budget for each expression
  #[arg(long, global = true)]
  fuel: Option<u64>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate every expression in a graph
  Validate {
    /// Path to the graph file (node-link JSON)
    graph_file: PathBuf,
  },

  /// List the variables referenced by transition criteria
  Vars { graph_file: PathBuf },

  /// List the tasks a run starts with
  Start { graph_file: PathBuf },

  /// Move a task to a new state and list the tasks it makes eligible
  Complete {
    graph_file: PathBuf,

    /// The task ID
    #[arg(long)]
    task: String,

    /// The state to move the task to
    #[arg(long)]
    state: String,

    /// JSON file with the evaluation context (default: stdin if piped)
    #[arg(long)]
    context: Option<PathBuf>,

    /// Write the updated graph back to the file
    #[arg(long)]
    write: bool,
  },

  /// List the cycles a task is part of
  Cycles {
    graph_file: PathBuf,

    /// The task ID
    #[arg(long)]
    task: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let registry = Arc::new(build_registry(cli.fuel));

  match cli.command {
    Some(Commands::Validate { graph_file }) => validate(&graph_file, registry)?,
    Some(Commands::Vars { graph_file }) => vars(&graph_file, registry)?,
    Some(Commands::Start { graph_file }) => start(&graph_file, registry)?,
    Some(Commands::Complete {
      graph_file,
      task,
      state,
      context,
      write,
    }) => complete(&graph_file, registry, &task, &state, context, write)?,
    Some(Commands::Cycles { graph_file, task }) => cycles(&graph_file, registry, &task)?,
    None => {
      println!("trellis - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn build_registry(fuel: Option<u64>) -> EvaluatorRegistry {
  let mut registry = EvaluatorRegistry::builtin();
  if let Some(fuel) = fuel {
    registry.register(JinjaEvaluator::new(JinjaConfig {
      fuel: Some(fuel),
      ..JinjaConfig::default()
    }));
  }
  registry
}

fn load_graph(path: &Path, registry: Arc<EvaluatorRegistry>) -> Result<WorkflowGraph> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read graph file: {}", path.display()))?;
  let doc = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse graph file: {}", path.display()))?;
  let graph = WorkflowGraph::deserialize_with_registry(doc, registry)
    .with_context(|| format!("invalid graph file: {}", path.display()))?;

  debug!(
    path = %path.display(),
    tasks = graph.task_count(),
    transitions = graph.transition_count(),
    "graph loaded"
  );
  Ok(graph)
}

fn validate(path: &Path, registry: Arc<EvaluatorRegistry>) -> Result<()> {
  let graph = load_graph(path, registry)?;
  let issues = graph.validate_expressions();

  println!("{}", serde_json::to_string_pretty(&issues)?);
  if !issues.is_empty() {
    bail!("{} invalid expression(s) in {}", issues.len(), path.display());
  }
  Ok(())
}

fn vars(path: &Path, registry: Arc<EvaluatorRegistry>) -> Result<()> {
  let graph = load_graph(path, registry)?;
  println!(
    "{}",
    serde_json::to_string_pretty(&graph.extract_criteria_vars())?
  );
  Ok(())
}

fn start(path: &Path, registry: Arc<EvaluatorRegistry>) -> Result<()> {
  let graph = load_graph(path, registry)?;
  println!("{}", serde_json::to_string_pretty(&graph.get_start_tasks())?);
  Ok(())
}

fn cycles(path: &Path, registry: Arc<EvaluatorRegistry>, task: &str) -> Result<()> {
  let graph = load_graph(path, registry)?;
  let cycles = graph
    .in_cycle(task)
    .with_context(|| format!("failed to inspect cycles through '{}'", task))?;
  println!("{}", serde_json::to_string_pretty(&cycles)?);
  Ok(())
}

fn complete(
  path: &Path,
  registry: Arc<EvaluatorRegistry>,
  task: &str,
  state: &str,
  context: Option<PathBuf>,
  write: bool,
) -> Result<()> {
  let graph = load_graph(path, registry)?;
  let state: State = state
    .parse()
    .with_context(|| format!("unknown state '{}'", state))?;
  let context = match context {
    Some(file) => read_context_file(&file)?,
    None => read_context_from_stdin()?,
  };

  let rt = tokio::runtime::Builder::new_current_thread().build()?;
  let (next, graph) = rt.block_on(async {
    let coordinator = GraphCoordinator::new(graph);
    let handle = coordinator.handle();
    let running = tokio::spawn(coordinator.start(CancellationToken::new()));

    let next = handle
      .complete_task(task, state, Some(context))
      .await
      .with_context(|| format!("failed to complete task '{}'", task))?;
    drop(handle);

    let graph = running.await.context("graph coordinator stopped")??;
    anyhow::Ok((next, graph))
  })?;

  info!(task_id = %task, state = %state, eligible = next.len(), "task completed");
  println!("{}", serde_json::to_string_pretty(&next)?);

  if write {
    let content = serde_json::to_string_pretty(&graph.serialize())?;
    std::fs::write(path, content)
      .with_context(|| format!("failed to write graph file: {}", path.display()))?;
  }
  Ok(())
}

fn read_context_file(path: &Path) -> Result<Map<String, Value>> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read context file: {}", path.display()))?;
  parse_context(&content)
    .with_context(|| format!("failed to parse context file: {}", path.display()))
}

fn read_context_from_stdin() -> Result<Map<String, Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read context from stdin")?;
  parse_context(&input).context("failed to parse context JSON from stdin")
}

fn parse_context(input: &str) -> Result<Map<String, Value>> {
  if input.trim().is_empty() {
    return Ok(Map::new());
  }
  match serde_json::from_str(input)? {
    Value::Object(map) => Ok(map),
    other => bail!("context must be a JSON object, got {}", other),
  }
}
