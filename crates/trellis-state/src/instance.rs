use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use trellis_trigger::TriggerIdentity;

use crate::bookmark::Bookmark;
use crate::error::StateError;
use crate::fault::Fault;
use crate::pointer::{ExecutionPointer, PointerId, PointerStatus};
use crate::scope::{ScopeId, VariableStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
  Running,
  Suspended,
  Completed,
  Faulted,
  Cancelled,
}

impl InstanceStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      InstanceStatus::Completed | InstanceStatus::Faulted | InstanceStatus::Cancelled
    )
  }
}

/// The aggregate root for one execution of a workflow.
///
/// This is the full persisted shape: serializing it and deserializing it
/// again yields an instance that advances and resumes identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
  pub instance_id: String,
  pub workflow_id: String,
  pub workflow_version: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<String>,
  pub status: InstanceStatus,
  pub pointers: BTreeMap<PointerId, ExecutionPointer>,
  pub scopes: VariableStore,
  pub bookmarks: Vec<Bookmark>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fault: Option<Fault>,
  next_pointer_id: PointerId,
  next_bookmark_seq: u64,
}

/// A compact view of an instance for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
  pub instance_id: String,
  pub workflow_id: String,
  pub status: InstanceStatus,
  pub active_pointers: usize,
  pub bookmarks: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fault: Option<Fault>,
}

impl WorkflowInstance {
  pub fn new(
    instance_id: impl Into<String>,
    workflow_id: impl Into<String>,
    workflow_version: u32,
  ) -> Self {
    Self {
      instance_id: instance_id.into(),
      workflow_id: workflow_id.into(),
      workflow_version,
      correlation_id: None,
      status: InstanceStatus::Running,
      pointers: BTreeMap::new(),
      scopes: VariableStore::new(),
      bookmarks: Vec::new(),
      fault: None,
      next_pointer_id: 1,
      next_bookmark_seq: 1,
    }
  }

  /// Add a pending pointer and return its id.
  pub fn push_pointer(
    &mut self,
    node_id: impl Into<String>,
    parent: Option<PointerId>,
    scope_id: ScopeId,
    owns_scope: bool,
  ) -> PointerId {
    let id = self.next_pointer_id;
    self.next_pointer_id += 1;
    self.pointers.insert(
      id,
      ExecutionPointer::new(id, node_id, parent, scope_id, owns_scope),
    );
    id
  }

  pub fn pointer(&self, id: PointerId) -> Option<&ExecutionPointer> {
    self.pointers.get(&id)
  }

  pub fn pointer_mut(&mut self, id: PointerId) -> Result<&mut ExecutionPointer, StateError> {
    self
      .pointers
      .get_mut(&id)
      .ok_or(StateError::PointerNotFound(id))
  }

  /// Remove a pointer, dropping the scope it owns.
  pub fn remove_pointer(&mut self, id: PointerId) -> Option<ExecutionPointer> {
    let pointer = self.pointers.remove(&id)?;
    if pointer.owns_scope
      && self.scopes.contains(pointer.scope_id)
      && let Err(e) = self.scopes.remove_scope(pointer.scope_id)
    {
      debug!(pointer_id = id, scope_id = pointer.scope_id, error = %e, "owned scope kept");
    }
    Some(pointer)
  }

  /// Direct children of a pointer, in creation order.
  pub fn children_of(&self, id: PointerId) -> Vec<PointerId> {
    self
      .pointers
      .values()
      .filter(|p| p.parent == Some(id))
      .map(|p| p.id)
      .collect()
  }

  /// Every pointer below `id`, depth first.
  pub fn descendants_of(&self, id: PointerId) -> Vec<PointerId> {
    let mut out = Vec::new();
    let mut stack = self.children_of(id);
    stack.reverse();
    while let Some(next) = stack.pop() {
      out.push(next);
      let mut children = self.children_of(next);
      children.reverse();
      stack.extend(children);
    }
    out
  }

  /// Pointers with the given status, in id order.
  pub fn pointers_with(&self, status: PointerStatus) -> Vec<PointerId> {
    self
      .pointers
      .values()
      .filter(|p| p.status == status)
      .map(|p| p.id)
      .collect()
  }

  /// Record a bookmark for a pointer. Ids are sequential per instance.
  pub fn add_bookmark(
    &mut self,
    pointer_id: PointerId,
    activity_id: impl Into<String>,
    trigger: TriggerIdentity,
    correlation: Option<Value>,
  ) -> Bookmark {
    let bookmark = Bookmark {
      bookmark_id: format!("bm-{}", self.next_bookmark_seq),
      instance_id: self.instance_id.clone(),
      pointer_id,
      activity_id: activity_id.into(),
      trigger,
      correlation,
    };
    self.next_bookmark_seq += 1;
    self.bookmarks.push(bookmark.clone());
    bookmark
  }

  pub fn bookmark(&self, bookmark_id: &str) -> Option<&Bookmark> {
    self.bookmarks.iter().find(|b| b.bookmark_id == bookmark_id)
  }

  /// Remove and return every bookmark held by `pointer_id`.
  pub fn take_bookmarks_for(&mut self, pointer_id: PointerId) -> Vec<Bookmark> {
    let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.bookmarks)
      .into_iter()
      .partition(|b| b.pointer_id == pointer_id);
    self.bookmarks = kept;
    taken
  }

  /// Remove and return every outstanding bookmark.
  pub fn clear_bookmarks(&mut self) -> Vec<Bookmark> {
    std::mem::take(&mut self.bookmarks)
  }

  pub fn bookmarks_matching(
    &self,
    trigger: &TriggerIdentity,
    correlation: Option<&Value>,
  ) -> Vec<&Bookmark> {
    self
      .bookmarks
      .iter()
      .filter(|b| b.matches(trigger, correlation))
      .collect()
  }

  /// Check the suspension invariants: every suspended pointer holds a
  /// bookmark and every bookmark belongs to a suspended pointer.
  pub fn verify(&self) -> Result<(), StateError> {
    for bookmark in &self.bookmarks {
      match self.pointers.get(&bookmark.pointer_id) {
        Some(p) if p.status == PointerStatus::Suspended => {}
        Some(p) => {
          return Err(StateError::Inconsistent(format!(
            "bookmark {} references pointer {} in status {:?}",
            bookmark.bookmark_id, p.id, p.status
          )));
        }
        None => {
          return Err(StateError::Inconsistent(format!(
            "bookmark {} references missing pointer {}",
            bookmark.bookmark_id, bookmark.pointer_id
          )));
        }
      }
    }

    for pointer in self.pointers.values() {
      if pointer.status == PointerStatus::Suspended
        && !self.bookmarks.iter().any(|b| b.pointer_id == pointer.id)
      {
        return Err(StateError::Inconsistent(format!(
          "pointer {} is suspended without a bookmark",
          pointer.id
        )));
      }
      if !self.scopes.contains(pointer.scope_id) {
        return Err(StateError::ScopeNotFound(pointer.scope_id));
      }
    }
    Ok(())
  }

  pub fn summary(&self) -> InstanceSummary {
    InstanceSummary {
      instance_id: self.instance_id.clone(),
      workflow_id: self.workflow_id.clone(),
      status: self.status,
      active_pointers: self.pointers.len(),
      bookmarks: self
        .bookmarks
        .iter()
        .map(|b| b.bookmark_id.clone())
        .collect(),
      fault: self.fault.clone(),
    }
  }
}
