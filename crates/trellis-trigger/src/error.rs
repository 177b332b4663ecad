use crate::identity::TriggerIdentity;

/// Error type for trigger operations.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
  #[error("invalid trigger identity: {0}")]
  InvalidIdentity(String),

  #[error("transport failed for {identity}: {message}")]
  Transport {
    identity: TriggerIdentity,
    message: String,
  },
}

impl TriggerError {
  pub fn transport(identity: &TriggerIdentity, message: impl Into<String>) -> Self {
    Self::Transport {
      identity: identity.clone(),
      message: message.into(),
    }
  }
}
