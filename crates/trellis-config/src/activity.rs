use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::enums::JoinMode;
use crate::input::InputValue;

/// A node of the activity tree as written by a workflow author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDef {
  pub activity_id: String,
  #[serde(flatten)]
  pub kind: ActivityKind,
  /// Input name -> expression text.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub inputs: HashMap<String, InputValue>,
  /// Activity output name -> variable the value is written to.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, String>,
  /// Variables declared by this activity. Only meaningful on composites.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
  /// Runs its children one after another.
  Sequence { activities: Vec<ActivityDef> },
  /// Starts every branch concurrently. Must be followed by a `Join`.
  Fork { branches: Vec<ActivityDef> },
  /// Closes the preceding `Fork`.
  Join {
    #[serde(default)]
    join_mode: JoinMode,
  },
  /// A leaf whose effect is provided by a registered activity type.
  Activity { activity_type: String },
}

impl ActivityDef {
  /// Create a leaf activity of the given type.
  pub fn leaf(activity_id: impl Into<String>, activity_type: impl Into<String>) -> Self {
    Self::new(
      activity_id,
      ActivityKind::Activity {
        activity_type: activity_type.into(),
      },
    )
  }

  /// Create a sequence over the given activities.
  pub fn sequence(activity_id: impl Into<String>, activities: Vec<ActivityDef>) -> Self {
    Self::new(activity_id, ActivityKind::Sequence { activities })
  }

  /// Create a fork over the given branches.
  pub fn fork(activity_id: impl Into<String>, branches: Vec<ActivityDef>) -> Self {
    Self::new(activity_id, ActivityKind::Fork { branches })
  }

  /// Create a join with the given mode.
  pub fn join(activity_id: impl Into<String>, join_mode: JoinMode) -> Self {
    Self::new(activity_id, ActivityKind::Join { join_mode })
  }

  fn new(activity_id: impl Into<String>, kind: ActivityKind) -> Self {
    Self {
      activity_id: activity_id.into(),
      kind,
      inputs: HashMap::new(),
      outputs: BTreeMap::new(),
      variables: Vec::new(),
    }
  }

  /// Add an input expression.
  pub fn with_input(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
    self.inputs.insert(name.into(), expression.into());
    self
  }

  /// Bind an activity output to a variable.
  pub fn with_output(mut self, output: impl Into<String>, variable: impl Into<String>) -> Self {
    self.outputs.insert(output.into(), variable.into());
    self
  }

  /// Declare a variable in this activity's scope.
  pub fn with_variable(mut self, name: impl Into<String>) -> Self {
    self.variables.push(name.into());
    self
  }

  /// Children in declaration order (activities of a sequence, branches of a fork).
  pub fn children(&self) -> &[ActivityDef] {
    match &self.kind {
      ActivityKind::Sequence { activities } => activities,
      ActivityKind::Fork { branches } => branches,
      ActivityKind::Join { .. } | ActivityKind::Activity { .. } => &[],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_nested_definition() {
    let def: ActivityDef = serde_json::from_value(json!({
      "activity_id": "root",
      "type": "sequence",
      "variables": ["total"],
      "activities": [
        {
          "activity_id": "receive",
          "type": "activity",
          "activity_type": "receive_message",
          "inputs": { "queue": "orders" },
          "outputs": { "message": "order" }
        },
        {
          "activity_id": "fork",
          "type": "fork",
          "branches": []
        },
        {
          "activity_id": "join",
          "type": "join",
          "join_mode": "wait_any"
        }
      ]
    }))
    .unwrap();

    assert_eq!(def.variables, vec!["total".to_string()]);
    assert_eq!(def.children().len(), 3);

    let receive = &def.children()[0];
    assert_eq!(
      receive.kind,
      ActivityKind::Activity {
        activity_type: "receive_message".to_string()
      }
    );
    assert_eq!(receive.inputs["queue"], "orders");
    assert_eq!(receive.outputs["message"], "order");

    assert_eq!(
      def.children()[2].kind,
      ActivityKind::Join {
        join_mode: JoinMode::WaitAny
      }
    );
  }

  #[test]
  fn test_join_mode_defaults_to_wait_all() {
    let def: ActivityDef = serde_json::from_value(json!({
      "activity_id": "join",
      "type": "join"
    }))
    .unwrap();

    assert_eq!(
      def.kind,
      ActivityKind::Join {
        join_mode: JoinMode::WaitAll
      }
    );
  }

  #[test]
  fn test_builder_serializes_without_empty_fields() {
    let def = ActivityDef::leaf("a", "assign").with_input("value", "42");
    let value = serde_json::to_value(&def).unwrap();

    assert_eq!(value["type"], "activity");
    assert_eq!(value["activity_type"], "assign");
    assert!(value.get("outputs").is_none());
    assert!(value.get("variables").is_none());
  }
}
