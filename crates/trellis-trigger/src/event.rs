use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identity::TriggerIdentity;

/// An event received from a trigger transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
  /// Unique identifier for this event
  pub event_id: String,

  /// Payload handed to the resumed activity
  pub payload: serde_json::Value,

  /// Correlation data. When present, only bookmarks with equal correlation are resumed.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correlation: Option<serde_json::Value>,

  /// Timestamp when the event was received (Unix millis)
  pub timestamp: u64,
}

impl TriggerEvent {
  pub fn new(payload: serde_json::Value) -> Self {
    let timestamp = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      .unwrap_or_default();

    Self {
      event_id: uuid::Uuid::new_v4().to_string(),
      payload,
      correlation: None,
      timestamp,
    }
  }

  pub fn with_correlation(mut self, correlation: serde_json::Value) -> Self {
    self.correlation = Some(correlation);
    self
  }
}

/// A message from a worker to the component that resumes workflows.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
  /// An event arrived on the worker's identity.
  Event {
    identity: TriggerIdentity,
    event: TriggerEvent,
  },
  /// The transport stopped delivering for this identity without being closed.
  TransportClosed { identity: TriggerIdentity },
}
