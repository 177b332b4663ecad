use serde::{Deserialize, Serialize};

use crate::activity::ActivityDef;

fn default_version() -> u32 {
  1
}

/// A workflow definition: an activity tree plus workflow-level variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  #[serde(default = "default_version")]
  pub version: u32,
  /// Variables declared in the workflow-instance scope.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub variables: Vec<String>,
  pub root: ActivityDef,
}

impl WorkflowDef {
  pub fn new(workflow_id: impl Into<String>, name: impl Into<String>, root: ActivityDef) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      name: name.into(),
      version: default_version(),
      variables: Vec::new(),
      root,
    }
  }
}
