//! Error types for workflow execution.

use thiserror::Error;
use trellis_state::{InstanceStatus, StateError};
use trellis_trigger::TriggerError;
use trellis_workflow::WorkflowError;

use crate::store::StoreError;

/// Errors that can occur while executing or hosting workflows.
#[derive(Debug, Error)]
pub enum EngineError {
  /// An activity id does not exist in the workflow.
  #[error("node not found: {0}")]
  NodeNotFound(String),

  /// The workflow graph is invalid.
  #[error("malformed graph: {message}")]
  MalformedGraph { message: String },

  /// No outstanding bookmark matches. The event arrived too late or twice.
  #[error("bookmark not found: {0}")]
  BookmarkNotFound(String),

  #[error("unknown activity type '{activity_type}' for activity '{activity_id}'")]
  UnknownActivityType {
    activity_id: String,
    activity_type: String,
  },

  #[error("instance '{instance_id}' is already {status:?}")]
  InstanceTerminal {
    instance_id: String,
    status: InstanceStatus,
  },

  /// The instance was created from a different workflow definition.
  #[error("instance '{instance_id}' belongs to {expected}, not {actual}")]
  DefinitionMismatch {
    instance_id: String,
    expected: String,
    actual: String,
  },

  #[error("workflow execution cancelled")]
  Cancelled,

  #[error("workflow not registered: {0}")]
  UnknownWorkflow(String),

  #[error("instance not found: {0}")]
  InstanceNotFound(String),

  #[error("mailbox for instance '{0}' is closed")]
  MailboxClosed(String),

  #[error(transparent)]
  State(#[from] StateError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("trigger error: {0}")]
  Trigger(#[from] TriggerError),
}

impl EngineError {
  pub fn malformed(message: impl Into<String>) -> Self {
    Self::MalformedGraph {
      message: message.into(),
    }
  }
}

impl From<WorkflowError> for EngineError {
  fn from(e: WorkflowError) -> Self {
    match e {
      WorkflowError::NodeNotFound(id) => Self::NodeNotFound(id),
      WorkflowError::MalformedGraph { message } => Self::MalformedGraph { message },
    }
  }
}
