//! Single-writer coordinator for a workflow graph.
//!
//! The `GraphCoordinator` owns the graph and an mpsc channel of commands.
//! Workers talk to it through cloneable [`GraphHandle`]s; every command is
//! applied in arrival order and answered through a oneshot channel, so
//! concurrent completions of a join's inbound tasks never race.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trellis_graph::{GraphError, NodeLinkGraph, State, Task, TaskRef, WorkflowGraph};

use crate::error::EngineError;
use crate::events::{EventNotifier, GraphEvent, NoopNotifier};

pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  /// Capacity of the command channel. Zero is treated as one.
  pub buffer_size: usize,
  /// Identifies this workflow instance in events and logs.
  pub instance_id: String,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      buffer_size: DEFAULT_BUFFER_SIZE,
      instance_id: uuid::Uuid::new_v4().to_string(),
    }
  }
}

type Reply<T> = oneshot::Sender<Result<T, GraphError>>;

enum Command {
  AddTask {
    task_id: String,
    attrs: Map<String, Value>,
    reply: Reply<()>,
  },
  UpdateTask {
    task_id: String,
    attrs: Map<String, Value>,
    reply: Reply<()>,
  },
  ResetTask {
    task_id: String,
    reply: Reply<()>,
  },
  AddTransition {
    source: String,
    destination: String,
    criteria: Vec<Value>,
    reply: Reply<usize>,
  },
  UpdateTransition {
    source: String,
    destination: String,
    key: usize,
    attrs: Map<String, Value>,
    reply: Reply<()>,
  },
  SetState {
    state: State,
    reply: Reply<()>,
  },
  CompleteTask {
    task_id: String,
    state: State,
    context: Option<Map<String, Value>>,
    reply: Reply<Vec<TaskRef>>,
  },
  GetNextTasks {
    task_id: String,
    context: Option<Map<String, Value>>,
    reply: Reply<Vec<TaskRef>>,
  },
  GetTask {
    task_id: String,
    reply: Reply<Task>,
  },
  Snapshot {
    reply: oneshot::Sender<NodeLinkGraph>,
  },
}

impl Command {
  fn name(&self) -> &'static str {
    match self {
      Command::AddTask { .. } => "add_task",
      Command::UpdateTask { .. } => "update_task",
      Command::ResetTask { .. } => "reset_task",
      Command::AddTransition { .. } => "add_transition",
      Command::UpdateTransition { .. } => "update_transition",
      Command::SetState { .. } => "set_state",
      Command::CompleteTask { .. } => "complete_task",
      Command::GetNextTasks { .. } => "get_next_tasks",
      Command::GetTask { .. } => "get_task",
      Command::Snapshot { .. } => "snapshot",
    }
  }
}

/// Owns a [`WorkflowGraph`] and serializes every mutation of it.
///
/// # Usage
///
/// ```ignore
/// let coordinator = GraphCoordinator::new(graph);
/// let handle = coordinator.handle();
///
/// let cancel = CancellationToken::new();
/// let running = tokio::spawn(coordinator.start(cancel.clone()));
///
/// let next = handle.complete_task("fetch", State::Succeeded, None).await?;
/// ```
pub struct GraphCoordinator {
  graph: WorkflowGraph,
  config: CoordinatorConfig,
  sender: mpsc::Sender<Command>,
  receiver: mpsc::Receiver<Command>,
  notifier: Arc<dyn EventNotifier>,
}

impl GraphCoordinator {
  pub fn new(graph: WorkflowGraph) -> Self {
    Self::with_config(graph, CoordinatorConfig::default())
  }

  pub fn with_config(graph: WorkflowGraph, config: CoordinatorConfig) -> Self {
    let (sender, receiver) = mpsc::channel(config.buffer_size.max(1));
    Self {
      graph,
      config,
      sender,
      receiver,
      notifier: Arc::new(NoopNotifier),
    }
  }

  /// Replace the event notifier.
  pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// A handle for sending commands. Can be cloned and shared across tasks.
  pub fn handle(&self) -> GraphHandle {
    GraphHandle {
      sender: self.sender.clone(),
    }
  }

  pub fn config(&self) -> &CoordinatorConfig {
    &self.config
  }

  pub fn graph(&self) -> &WorkflowGraph {
    &self.graph
  }

  /// Run the command loop.
  ///
  /// Returns the final graph once the cancellation token fires or every
  /// handle has been dropped.
  #[instrument(name = "graph_coordinator", skip_all, fields(instance_id = %self.config.instance_id))]
  pub async fn start(mut self, cancel: CancellationToken) -> Result<WorkflowGraph, EngineError> {
    info!(
      tasks = self.graph.task_count(),
      transitions = self.graph.transition_count(),
      "starting graph coordinator"
    );

    // Only external handles keep the channel open from here on.
    let (closed, _) = mpsc::channel(1);
    drop(std::mem::replace(&mut self.sender, closed));

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("graph coordinator cancelled");
          break;
        }
        command = self.receiver.recv() => {
          match command {
            Some(command) => self.apply(command),
            None => {
              info!("all graph handles dropped");
              break;
            }
          }
        }
      }
    }

    Ok(self.graph)
  }

  fn apply(&mut self, command: Command) {
    let name = command.name();
    debug!(command = name, "applying command");

    match command {
      Command::AddTask {
        task_id,
        attrs,
        reply,
      } => {
        let old = self.task_state(&task_id);
        let result = self.graph.add_task(&task_id, attrs);
        if result.is_ok() {
          self.notify_state_change(&task_id, old);
        }
        self.reply(name, reply, result);
      }
      Command::UpdateTask {
        task_id,
        attrs,
        reply,
      } => {
        let old = self.task_state(&task_id);
        let result = self.graph.update_task(&task_id, attrs);
        if result.is_ok() {
          self.notify_state_change(&task_id, old);
        }
        self.reply(name, reply, result);
      }
      Command::ResetTask { task_id, reply } => {
        let result = self.graph.reset_task(&task_id);
        if result.is_ok() {
          self.notifier.notify(GraphEvent::TaskReset {
            instance_id: self.config.instance_id.clone(),
            task_id,
          });
        }
        self.reply(name, reply, result);
      }
      Command::AddTransition {
        source,
        destination,
        criteria,
        reply,
      } => {
        let result = self.graph.add_transition(&source, &destination, criteria);
        self.reply(name, reply, result);
      }
      Command::UpdateTransition {
        source,
        destination,
        key,
        attrs,
        reply,
      } => {
        let result = self
          .graph
          .update_transition(&source, &destination, key, attrs);
        self.reply(name, reply, result);
      }
      Command::SetState { state, reply } => {
        let old = self.graph.state();
        let result = self.graph.set_state(state);
        if result.is_ok() && old != Some(state) {
          self.notifier.notify(GraphEvent::WorkflowStateChanged {
            instance_id: self.config.instance_id.clone(),
            old,
            new: state,
          });
        }
        self.reply(name, reply, result);
      }
      Command::CompleteTask {
        task_id,
        state,
        context,
        reply,
      } => {
        let old = self.task_state(&task_id);
        let result = match self.graph.update_task_state(&task_id, state) {
          Ok(()) => {
            self.notify_state_change(&task_id, old);
            self.graph.get_next_tasks(&task_id, context.as_ref())
          }
          Err(e) => Err(e),
        };
        if let Ok(tasks) = &result {
          self.notify_eligible(&task_id, tasks);
        }
        self.reply(name, reply, result);
      }
      Command::GetNextTasks {
        task_id,
        context,
        reply,
      } => {
        let result = self.graph.get_next_tasks(&task_id, context.as_ref());
        if let Ok(tasks) = &result {
          self.notify_eligible(&task_id, tasks);
        }
        self.reply(name, reply, result);
      }
      Command::GetTask { task_id, reply } => {
        let result = self.graph.get_task(&task_id);
        self.reply(name, reply, result);
      }
      Command::Snapshot { reply } => {
        let _ = reply.send(self.graph.serialize());
      }
    }
  }

  fn reply<T>(&self, command: &'static str, reply: Reply<T>, result: Result<T, GraphError>) {
    if let Err(e) = &result {
      warn!(command, error = %e, "command failed");
      self.notifier.notify(GraphEvent::CommandFailed {
        instance_id: self.config.instance_id.clone(),
        command: command.to_string(),
        error: e.to_string(),
      });
    }
    // The caller may have given up waiting.
    let _ = reply.send(result);
  }

  fn task_state(&self, task_id: &str) -> Option<State> {
    self.graph.get_task(task_id).ok().and_then(|t| t.state)
  }

  fn notify_state_change(&self, task_id: &str, old: Option<State>) {
    let new = self.task_state(task_id);
    if let Some(new) = new
      && old != Some(new)
    {
      info!(task_id = %task_id, old = ?old, new = %new, "task state changed");
      self.notifier.notify(GraphEvent::TaskStateChanged {
        instance_id: self.config.instance_id.clone(),
        task_id: task_id.to_string(),
        old,
        new,
      });
    }
  }

  fn notify_eligible(&self, task_id: &str, tasks: &[TaskRef]) {
    if tasks.is_empty() {
      return;
    }
    info!(task_id = %task_id, eligible = tasks.len(), "tasks eligible");
    self.notifier.notify(GraphEvent::TasksEligible {
      instance_id: self.config.instance_id.clone(),
      task_id: task_id.to_string(),
      tasks: tasks.to_vec(),
    });
  }
}

/// Cloneable sender side of a [`GraphCoordinator`].
#[derive(Clone)]
pub struct GraphHandle {
  sender: mpsc::Sender<Command>,
}

impl GraphHandle {
  async fn request<T>(
    &self,
    command: impl FnOnce(Reply<T>) -> Command,
  ) -> Result<T, EngineError> {
    let (reply, response) = oneshot::channel();
    self
      .sender
      .send(command(reply))
      .await
      .map_err(|_| EngineError::ChannelClosed)?;
    let result = response.await.map_err(|_| EngineError::ChannelClosed)?;
    Ok(result?)
  }

  pub async fn add_task(&self, task_id: &str, attrs: Map<String, Value>) -> Result<(), EngineError> {
    self
      .request(|reply| Command::AddTask {
        task_id: task_id.to_string(),
        attrs,
        reply,
      })
      .await
  }

  pub async fn update_task(
    &self,
    task_id: &str,
    attrs: Map<String, Value>,
  ) -> Result<(), EngineError> {
    self
      .request(|reply| Command::UpdateTask {
        task_id: task_id.to_string(),
        attrs,
        reply,
      })
      .await
  }

  pub async fn reset_task(&self, task_id: &str) -> Result<(), EngineError> {
    self
      .request(|reply| Command::ResetTask {
        task_id: task_id.to_string(),
        reply,
      })
      .await
  }

  pub async fn add_transition(
    &self,
    source: &str,
    destination: &str,
    criteria: Vec<Value>,
  ) -> Result<usize, EngineError> {
    self
      .request(|reply| Command::AddTransition {
        source: source.to_string(),
        destination: destination.to_string(),
        criteria,
        reply,
      })
      .await
  }

  pub async fn update_transition(
    &self,
    source: &str,
    destination: &str,
    key: usize,
    attrs: Map<String, Value>,
  ) -> Result<(), EngineError> {
    self
      .request(|reply| Command::UpdateTransition {
        source: source.to_string(),
        destination: destination.to_string(),
        key,
        attrs,
        reply,
      })
      .await
  }

  pub async fn set_state(&self, state: State) -> Result<(), EngineError> {
    self
      .request(|reply| Command::SetState { state, reply })
      .await
  }

  /// Move a task to `state` and resolve its next tasks in one step.
  pub async fn complete_task(
    &self,
    task_id: &str,
    state: State,
    context: Option<Map<String, Value>>,
  ) -> Result<Vec<TaskRef>, EngineError> {
    self
      .request(|reply| Command::CompleteTask {
        task_id: task_id.to_string(),
        state,
        context,
        reply,
      })
      .await
  }

  pub async fn get_next_tasks(
    &self,
    task_id: &str,
    context: Option<Map<String, Value>>,
  ) -> Result<Vec<TaskRef>, EngineError> {
    self
      .request(|reply| Command::GetNextTasks {
        task_id: task_id.to_string(),
        context,
        reply,
      })
      .await
  }

  pub async fn get_task(&self, task_id: &str) -> Result<Task, EngineError> {
    self
      .request(|reply| Command::GetTask {
        task_id: task_id.to_string(),
        reply,
      })
      .await
  }

  /// The current graph as a node-link document.
  pub async fn snapshot(&self) -> Result<NodeLinkGraph, EngineError> {
    let (reply, response) = oneshot::channel();
    self
      .sender
      .send(Command::Snapshot { reply })
      .await
      .map_err(|_| EngineError::ChannelClosed)?;
    response.await.map_err(|_| EngineError::ChannelClosed)
  }

  pub fn is_closed(&self) -> bool {
    self.sender.is_closed()
  }
}
