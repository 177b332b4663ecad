use std::collections::{BTreeSet, HashMap};

use trellis_config::{ActivityDef, WorkflowDef};

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::node::{Node, NodeType};

/// A loaded workflow ready for execution.
#[derive(Debug, Clone)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub version: u32,
  /// Variables declared in the workflow-instance scope.
  pub variables: Vec<String>,
  root: String,
  nodes: HashMap<String, Node>,
  graph: Graph,
}

impl Workflow {
  /// Flatten and validate a definition.
  ///
  /// This is the only place the graph is validated; execution relies on
  /// the invariants established here.
  pub fn load(def: WorkflowDef) -> Result<Self, WorkflowError> {
    let mut nodes = HashMap::new();
    let mut edges = Vec::new();
    flatten(&def.root, &mut nodes, &mut edges)?;

    let graph = Graph::new(&nodes, &edges)?;

    let root = &nodes[&def.root.activity_id];
    if matches!(root.node_type, NodeType::Join { .. } | NodeType::Fork) {
      return Err(WorkflowError::malformed(format!(
        "root '{}' must be a sequence or an activity",
        root.node_id
      )));
    }

    Ok(Self {
      workflow_id: def.workflow_id,
      name: def.name,
      version: def.version,
      variables: def.variables,
      root: def.root.activity_id,
      nodes,
      graph,
    })
  }

  /// Get the root node.
  pub fn root(&self) -> &Node {
    &self.nodes[&self.root]
  }

  /// Resolve a node by ID.
  pub fn resolve(&self, node_id: &str) -> Result<&Node, WorkflowError> {
    self
      .nodes
      .get(node_id)
      .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  /// Get the ordered children of a node.
  pub fn children_of(&self, node_id: &str) -> Result<&[String], WorkflowError> {
    self.resolve(node_id)?;
    Ok(self.graph.children(node_id))
  }

  /// Get the Join that closes a Fork.
  pub fn join_target_of(&self, fork_id: &str) -> Result<&Node, WorkflowError> {
    let fork = self.resolve(fork_id)?;
    if fork.node_type != NodeType::Fork {
      return Err(WorkflowError::malformed(format!(
        "'{}' is not a fork",
        fork_id
      )));
    }
    let join_id = self.graph.join_target(fork_id).ok_or_else(|| {
      WorkflowError::malformed(format!("fork '{}' has no matching join", fork_id))
    })?;
    self.resolve(join_id)
  }

  /// Get the enclosing composite of a node.
  pub fn parent_of(&self, node_id: &str) -> Option<&str> {
    self.graph.parent(node_id)
  }

  /// All nodes, ordered by id.
  pub fn nodes(&self) -> Vec<&Node> {
    let mut nodes: Vec<_> = self.nodes.values().collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    nodes
  }

  /// All activity types referenced by leaves.
  pub fn activity_types(&self) -> BTreeSet<&str> {
    self.nodes.values().filter_map(|n| n.activity_type()).collect()
  }

  /// Get the graph structure.
  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Number of nodes.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

fn flatten(
  def: &ActivityDef,
  nodes: &mut HashMap<String, Node>,
  edges: &mut Vec<(String, String)>,
) -> Result<(), WorkflowError> {
  if def.activity_id.is_empty() {
    return Err(WorkflowError::malformed("activity id cannot be empty"));
  }
  if nodes.contains_key(&def.activity_id) {
    return Err(WorkflowError::malformed(format!(
      "duplicate activity id '{}'",
      def.activity_id
    )));
  }
  nodes.insert(def.activity_id.clone(), Node::from_def(def));

  for child in def.children() {
    edges.push((def.activity_id.clone(), child.activity_id.clone()));
    flatten(child, nodes, edges)?;
  }

  Ok(())
}
