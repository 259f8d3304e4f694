//! Lifecycle events of an execution.
//!
//! The engine reports every node transition and every change of execution
//! status to one [`ExecutionNotifier`]. A paused run emits
//! [`ExecutionEvent::WorkflowPaused`] with the pause id a host needs to find
//! the stored state again.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ExecutionEvent {
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  NodeStarted {
    execution_id: String,
    node_id: String,
  },

  NodeCompleted {
    execution_id: String,
    node_id: String,
    data: serde_json::Value,
  },

  NodeFailed {
    execution_id: String,
    node_id: String,
    error: String,
  },

  /// The run suspended at an await node.
  WorkflowPaused {
    execution_id: String,
    node_id: String,
    pause_id: String,
  },

  /// A paused run accepted an event and continued.
  WorkflowResumed {
    execution_id: String,
    node_id: String,
    trigger: String,
  },

  WorkflowCompleted { execution_id: String },

  WorkflowFailed { execution_id: String, error: String },

  WorkflowCancelled { execution_id: String },
}

/// Observer of [`ExecutionEvent`]s.
///
/// Called inline from the interpreter, so implementations must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Forwards events to a `tokio` channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// A notifier and the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // A closed receiver only means nobody is listening any more.
    let _ = self.sender.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_event_json_shape() {
    let event = ExecutionEvent::WorkflowPaused {
      execution_id: "e1".to_string(),
      node_id: "wait".to_string(),
      pause_id: "p1".to_string(),
    };
    assert_eq!(
      serde_json::to_value(&event).unwrap(),
      json!({"event": "workflow_paused", "executionId": "e1", "nodeId": "wait", "pauseId": "p1"})
    );
  }

  #[test]
  fn test_channel_notifier_survives_closed_receiver() {
    let (notifier, receiver) = ChannelNotifier::channel();
    drop(receiver);
    notifier.notify(ExecutionEvent::WorkflowCompleted {
      execution_id: "e1".to_string(),
    });
  }
}
