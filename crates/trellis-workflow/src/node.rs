use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use trellis_config::{ActivityDef, ActivityKind, InputValue, JoinMode};

/// A node of a loaded workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  pub node_type: NodeType,
  pub inputs: HashMap<String, InputValue>,
  pub outputs: BTreeMap<String, String>,
  pub variables: Vec<String>,
}

/// The type of a loaded node. Composites are a closed set; leaves name an
/// activity type that is looked up in the engine's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
  Sequence,
  Fork,
  Join { mode: JoinMode },
  Activity { activity_type: String },
}

impl Node {
  pub(crate) fn from_def(def: &ActivityDef) -> Self {
    let node_type = match &def.kind {
      ActivityKind::Sequence { .. } => NodeType::Sequence,
      ActivityKind::Fork { .. } => NodeType::Fork,
      ActivityKind::Join { join_mode } => NodeType::Join { mode: *join_mode },
      ActivityKind::Activity { activity_type } => NodeType::Activity {
        activity_type: activity_type.clone(),
      },
    };

    Self {
      node_id: def.activity_id.clone(),
      node_type,
      inputs: def.inputs.clone(),
      outputs: def.outputs.clone(),
      variables: def.variables.clone(),
    }
  }

  /// Whether this node is a leaf activity.
  pub fn is_leaf(&self) -> bool {
    matches!(self.node_type, NodeType::Activity { .. })
  }

  /// The registered activity type of a leaf.
  pub fn activity_type(&self) -> Option<&str> {
    match &self.node_type {
      NodeType::Activity { activity_type } => Some(activity_type),
      _ => None,
    }
  }
}
