//! Execution events and notifiers for observability.
//!
//! Events are emitted while instances advance so consumers can observe
//! progress, stream it to a UI or keep an audit log.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  WorkflowStarted {
    instance_id: String,
    workflow_id: String,
  },

  /// An activity is about to execute.
  ActivityStarted {
    instance_id: String,
    activity_id: String,
  },

  ActivityCompleted {
    instance_id: String,
    activity_id: String,
    outputs: serde_json::Value,
  },

  /// A leaf activity is waiting on the listed bookmarks.
  ActivitySuspended {
    instance_id: String,
    activity_id: String,
    bookmarks: Vec<String>,
  },

  ActivityFaulted {
    instance_id: String,
    activity_id: String,
    error: String,
  },

  ActivityCancelled {
    instance_id: String,
    activity_id: String,
  },

  WorkflowSuspended { instance_id: String },

  WorkflowResumed {
    instance_id: String,
    bookmark_id: String,
  },

  WorkflowCompleted { instance_id: String },

  WorkflowFaulted { instance_id: String, error: String },

  WorkflowCancelled { instance_id: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event. Implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Sending never blocks the engine.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier and the receiver its events arrive on.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self::new(tx), rx)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
