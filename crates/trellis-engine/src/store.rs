//! Persistence for workflow instances.
//!
//! The [`InstanceStore`] trait saves and loads the whole instance aggregate.
//! Two implementations ship with the engine:
//! - [`InMemoryInstanceStore`] for tests and embedded hosts
//! - [`FsInstanceStore`], one JSON document per instance

use async_trait::async_trait;
use trellis_state::{Bookmark, InstanceSummary, WorkflowInstance};
use trellis_trigger::TriggerIdentity;

pub use crate::fs_store::FsInstanceStore;
pub use crate::memory_store::InMemoryInstanceStore;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested instance was not found.
  #[error("not found: {0}")]
  NotFound(String),

  #[error("invalid instance id: {0}")]
  InvalidId(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Storage trait for workflow instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
  /// Insert or replace an instance.
  async fn save(&self, instance: &WorkflowInstance) -> Result<(), StoreError>;

  async fn load(&self, instance_id: &str) -> Result<WorkflowInstance, StoreError>;

  /// Summaries of every stored instance, ordered by instance id.
  async fn list(&self) -> Result<Vec<InstanceSummary>, StoreError>;

  /// Outstanding bookmarks on `trigger` across all instances.
  async fn find_bookmarks(&self, trigger: &TriggerIdentity) -> Result<Vec<Bookmark>, StoreError>;
}
