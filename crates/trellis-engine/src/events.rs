//! Graph events and notifiers for observability.
//!
//! Events are emitted by the coordinator after each applied change so
//! consumers can persist state, stream progress to a UI or schedule work.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use trellis_graph::{State, TaskRef};

/// Events emitted while a workflow graph is being driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
  /// A task moved to a new state.
  TaskStateChanged {
    instance_id: String,
    task_id: String,
    old: Option<State>,
    new: State,
  },

  /// Completing `task_id` made these tasks eligible to run.
  TasksEligible {
    instance_id: String,
    task_id: String,
    tasks: Vec<TaskRef>,
  },

  /// A task was re-armed for another pass.
  TaskReset { instance_id: String, task_id: String },

  /// The workflow itself changed state.
  WorkflowStateChanged {
    instance_id: String,
    old: Option<State>,
    new: State,
  },

  /// A command was rejected by the graph.
  CommandFailed {
    instance_id: String,
    command: String,
    error: String,
  },
}

/// Receives graph events.
///
/// The coordinator calls `notify` from its own loop, so implementations
/// should return quickly.
pub trait EventNotifier: Send + Sync {
  fn notify(&self, event: GraphEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
  fn notify(&self, _event: GraphEvent) {}
}

/// Forwards events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls the coordinator; volume is a
/// handful of events per task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<GraphEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<GraphEvent>) -> Self {
    Self { sender }
  }
}

impl EventNotifier for ChannelNotifier {
  fn notify(&self, event: GraphEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_channel_notifier_forwards() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let notifier = ChannelNotifier::new(tx);

    notifier.notify(GraphEvent::TaskReset {
      instance_id: "wf".to_string(),
      task_id: "a".to_string(),
    });

    assert!(matches!(
      rx.try_recv().unwrap(),
      GraphEvent::TaskReset { ref task_id, .. } if task_id == "a"
    ));
  }

  #[test]
  fn test_channel_notifier_ignores_closed_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    ChannelNotifier::new(tx).notify(GraphEvent::TaskReset {
      instance_id: "wf".to_string(),
      task_id: "a".to_string(),
    });
  }

  #[test]
  fn test_event_serializes_states_lowercase() {
    let event = GraphEvent::WorkflowStateChanged {
      instance_id: "wf".to_string(),
      old: None,
      new: State::Running,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["WorkflowStateChanged"]["new"], "running");
    assert!(value["WorkflowStateChanged"]["old"].is_null());
  }
}
