use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("malformed graph: {message}")]
  MalformedGraph { message: String },
}

impl WorkflowError {
  pub fn malformed(message: impl Into<String>) -> Self {
    Self::MalformedGraph {
      message: message.into(),
    }
  }
}
