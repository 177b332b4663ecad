use serde::Serialize;
use serde_json::{Map, Value};

/// The view of a workflow instance an expression is evaluated against.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpressionContext {
  /// Variables visible from the activity's scope, closer scopes shadowing farther ones.
  pub variables: Map<String, Value>,
  pub workflow_instance_id: String,
  pub correlation_id: Option<String>,
  pub activity_id: String,
  /// Payload of the resume that led to this evaluation, if any.
  pub resume: Option<Value>,
}

impl ExpressionContext {
  pub fn new(workflow_instance_id: impl Into<String>, activity_id: impl Into<String>) -> Self {
    Self {
      workflow_instance_id: workflow_instance_id.into(),
      activity_id: activity_id.into(),
      ..Default::default()
    }
  }

  pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
    self.variables = variables;
    self
  }

  pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
    self.correlation_id = correlation_id;
    self
  }

  pub fn with_resume(mut self, resume: Option<Value>) -> Self {
    self.resume = resume;
    self
  }

  /// The namespace expressions see: every variable by name, plus `resume`
  /// when the evaluation follows a resume.
  pub fn namespace(&self) -> Map<String, Value> {
    let mut namespace = self.variables.clone();
    if let Some(resume) = &self.resume {
      namespace.insert("resume".to_string(), resume.clone());
    }
    namespace
  }
}
