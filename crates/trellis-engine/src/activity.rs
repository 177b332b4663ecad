//! The leaf activity capability.
//!
//! Composite behaviour (sequence, fork, join) is built into the engine.
//! Everything else is an [`Activity`] looked up by type name in an
//! [`ActivityRegistry`], so new activity types never touch the interpreter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use trellis_trigger::TriggerIdentity;

use crate::builtins::{
  AssignActivity, FailActivity, ReceiveMessageActivity, SetCorrelationIdActivity,
};

/// Resolved input values, keyed by input name.
pub type ActivityInputs = Map<String, Value>;

/// Output values, keyed by output name.
pub type ActivityOutputs = Map<String, Value>;

/// What an activity sees of the instance it runs in.
#[derive(Debug, Clone)]
pub struct ActivityContext {
  pub instance_id: String,
  pub activity_id: String,
  pub correlation_id: Option<String>,
  /// Variables visible from the activity's scope.
  pub variables: Map<String, Value>,
  /// Set when this execution follows a resume of one of the activity's bookmarks.
  pub resume_payload: Option<Value>,
  pub cancel: CancellationToken,
}

/// A request to suspend on an external trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkRequest {
  pub trigger: TriggerIdentity,
  pub correlation: Option<Value>,
}

impl BookmarkRequest {
  pub fn new(trigger: TriggerIdentity) -> Self {
    Self {
      trigger,
      correlation: None,
    }
  }

  pub fn with_correlation(mut self, correlation: Value) -> Self {
    self.correlation = Some(correlation);
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityOutcome {
  Completed(ActivityOutputs),
  /// Complete, and from now on correlate the instance under `correlation_id`.
  Correlated {
    correlation_id: String,
    outputs: ActivityOutputs,
  },
  /// Wait for any of these triggers. The first one to fire resumes the activity.
  Suspend(Vec<BookmarkRequest>),
}

/// Failure reported by an activity. Faults the activity's pointer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActivityError {
  #[error("{0}")]
  Failed(String),

  #[error("invalid input '{name}': {message}")]
  InvalidInput { name: String, message: String },
}

impl ActivityError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed(message.into())
  }

  pub fn invalid_input(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidInput {
      name: name.into(),
      message: message.into(),
    }
  }
}

#[async_trait]
pub trait Activity: Send + Sync {
  async fn execute(
    &self,
    context: &ActivityContext,
    inputs: &ActivityInputs,
  ) -> Result<ActivityOutcome, ActivityError>;
}

/// Activity implementations by type name.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
  activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding `assign`, `receive_message`, `set_correlation_id` and `fail`.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register("assign", AssignActivity);
    registry.register("receive_message", ReceiveMessageActivity);
    registry.register("set_correlation_id", SetCorrelationIdActivity);
    registry.register("fail", FailActivity);
    registry
  }

  pub fn register(&mut self, activity_type: impl Into<String>, activity: impl Activity + 'static) {
    self
      .activities
      .insert(activity_type.into(), Arc::new(activity));
  }

  pub fn get(&self, activity_type: &str) -> Option<Arc<dyn Activity>> {
    self.activities.get(activity_type).cloned()
  }

  pub fn contains(&self, activity_type: &str) -> bool {
    self.activities.contains_key(activity_type)
  }

  /// Registered type names, sorted.
  pub fn types(&self) -> Vec<&str> {
    let mut types: Vec<_> = self.activities.keys().map(String::as_str).collect();
    types.sort_unstable();
    types
  }
}

impl std::fmt::Debug for ActivityRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActivityRegistry")
      .field("types", &self.types())
      .finish()
  }
}
