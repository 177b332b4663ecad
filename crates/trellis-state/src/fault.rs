use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
  /// An input expression could not be evaluated.
  Evaluation,
  /// The activity reported a failure.
  Activity,
  /// Every branch of a fork faulted.
  Branch,
}

/// Why a pointer or instance faulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
  /// The activity where the fault originated
  pub activity_id: String,
  pub kind: FaultKind,
  pub message: String,
}

impl Fault {
  pub fn new(activity_id: impl Into<String>, kind: FaultKind, message: impl Into<String>) -> Self {
    Self {
      activity_id: activity_id.into(),
      kind,
      message: message.into(),
    }
  }
}

impl std::fmt::Display for Fault {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({:?}): {}", self.activity_id, self.kind, self.message)
  }
}
