use std::collections::HashMap;

use crate::error::WorkflowError;
use crate::node::{Node, NodeType};

/// Structure of the activity tree for traversal.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Composite node_id -> ordered child node_ids.
  children: HashMap<String, Vec<String>>,
  /// node_id -> enclosing composite node_id.
  parents: HashMap<String, String>,
  /// Fork node_id -> the Join that closes it.
  join_targets: HashMap<String, String>,
  /// Join node_id -> the Fork it closes.
  join_sources: HashMap<String, String>,
}

impl Graph {
  /// Build the graph from nodes and ordered parent -> child edges.
  ///
  /// Fails if a Fork is not directly followed by a Join in its enclosing
  /// sequence, or if a Join does not close a Fork.
  pub fn new(
    nodes: &HashMap<String, Node>,
    edges: &[(String, String)],
  ) -> Result<Self, WorkflowError> {
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    let mut parents: HashMap<String, String> = HashMap::new();

    for (parent, child) in edges {
      if !nodes.contains_key(parent) {
        return Err(WorkflowError::NodeNotFound(parent.clone()));
      }
      if !nodes.contains_key(child) {
        return Err(WorkflowError::NodeNotFound(child.clone()));
      }
      children.entry(parent.clone()).or_default().push(child.clone());
      parents.insert(child.clone(), parent.clone());
    }

    let mut join_targets = HashMap::new();
    let mut join_sources = HashMap::new();

    for (node_id, node) in nodes {
      let siblings: &[String] = parents
        .get(node_id)
        .and_then(|p| children.get(p))
        .map(|v| v.as_slice())
        .unwrap_or(&[]);
      let in_sequence = parents
        .get(node_id)
        .and_then(|p| nodes.get(p))
        .is_some_and(|p| p.node_type == NodeType::Sequence);
      let position = siblings.iter().position(|s| s == node_id);

      match node.node_type {
        NodeType::Fork => {
          let join = position
            .filter(|_| in_sequence)
            .and_then(|i| siblings.get(i + 1))
            .filter(|next| {
              nodes
                .get(*next)
                .is_some_and(|n| matches!(n.node_type, NodeType::Join { .. }))
            })
            .ok_or_else(|| {
              WorkflowError::malformed(format!(
                "fork '{}' is not followed by a join in its enclosing sequence",
                node_id
              ))
            })?;
          join_targets.insert(node_id.clone(), join.clone());
          join_sources.insert(join.clone(), node_id.clone());
        }
        NodeType::Join { .. } => {
          let opens = position
            .filter(|_| in_sequence)
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| siblings.get(i))
            .is_some_and(|prev| nodes.get(prev).is_some_and(|n| n.node_type == NodeType::Fork));
          if !opens {
            return Err(WorkflowError::malformed(format!(
              "join '{}' does not close a fork",
              node_id
            )));
          }
        }
        NodeType::Activity { .. } => {
          if children.get(node_id).is_some_and(|c| !c.is_empty()) {
            return Err(WorkflowError::malformed(format!(
              "leaf activity '{}' cannot have children",
              node_id
            )));
          }
        }
        NodeType::Sequence => {}
      }
    }

    Ok(Self {
      children,
      parents,
      join_targets,
      join_sources,
    })
  }

  /// Get the ordered children of a composite node.
  pub fn children(&self, node_id: &str) -> &[String] {
    self
      .children
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get the enclosing composite of a node.
  pub fn parent(&self, node_id: &str) -> Option<&str> {
    self.parents.get(node_id).map(|p| p.as_str())
  }

  /// Get the Join that closes a Fork.
  pub fn join_target(&self, fork_id: &str) -> Option<&str> {
    self.join_targets.get(fork_id).map(|j| j.as_str())
  }

  /// Get the Fork a Join closes.
  pub fn fork_of(&self, join_id: &str) -> Option<&str> {
    self.join_sources.get(join_id).map(|f| f.as_str())
  }

  /// Check if a node is a Join.
  pub fn is_join(&self, node_id: &str) -> bool {
    self.join_sources.contains_key(node_id)
  }
}
