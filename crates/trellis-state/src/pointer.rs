use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fault::Fault;
use crate::scope::ScopeId;

pub type PointerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerStatus {
  Pending,
  Running,
  Suspended,
  Completed,
  Faulted,
  Cancelled,
}

impl PointerStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      PointerStatus::Completed | PointerStatus::Faulted | PointerStatus::Cancelled
    )
  }
}

/// One active position in the activity graph.
///
/// Composite pointers (sequence, fork) stay in the set while their children
/// run; `parent` links a child to the composite pointer that spawned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPointer {
  pub id: PointerId,
  pub node_id: String,
  pub parent: Option<PointerId>,
  pub scope_id: ScopeId,
  /// Whether `scope_id` was created for this pointer and dies with it.
  pub owns_scope: bool,
  pub status: PointerStatus,
  /// Index of the active child, for sequences.
  #[serde(default)]
  pub child_index: usize,
  /// Payload from the resume that woke this pointer, consumed by the next execution.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resume_payload: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fault: Option<Fault>,
}

impl ExecutionPointer {
  pub fn new(
    id: PointerId,
    node_id: impl Into<String>,
    parent: Option<PointerId>,
    scope_id: ScopeId,
    owns_scope: bool,
  ) -> Self {
    Self {
      id,
      node_id: node_id.into(),
      parent,
      scope_id,
      owns_scope,
      status: PointerStatus::Pending,
      child_index: 0,
      resume_payload: None,
      fault: None,
    }
  }
}
