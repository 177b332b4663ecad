/// An expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to evaluate '{expression}': {message}")]
pub struct EvaluationError {
  pub expression: String,
  pub message: String,
}

impl EvaluationError {
  pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      expression: expression.into(),
      message: message.into(),
    }
  }
}
