use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;
use trellis_state::{Bookmark, InstanceSummary, WorkflowInstance};
use trellis_trigger::TriggerIdentity;

use crate::store::{InstanceStore, StoreError};

/// Filesystem-based instance store.
///
/// Instances are stored as one JSON document each:
/// ```text
/// {root}/
/// ├── 6f1c...e2.json
/// └── a93d...10.json
/// ```
pub struct FsInstanceStore {
  root: PathBuf,
}

impl FsInstanceStore {
  /// Create a store rooted at `root`. The directory is created on first save.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_for(&self, instance_id: &str) -> Result<PathBuf, StoreError> {
    let valid = !instance_id.is_empty()
      && instance_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
      return Err(StoreError::InvalidId(instance_id.to_string()));
    }
    Ok(self.root.join(format!("{instance_id}.json")))
  }

  /// Every readable instance. Documents that cannot be read or parsed are
  /// skipped so one damaged file does not hide the rest.
  async fn read_all(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
    let mut entries = match fs::read_dir(&self.root).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut instances = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if !path.extension().is_some_and(|ext| ext == "json") {
        continue;
      }
      let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
          warn!(path = %path.display(), error = %e, "skipping unreadable instance");
          continue;
        }
      };
      match serde_json::from_str::<WorkflowInstance>(&content) {
        Ok(instance) => instances.push(instance),
        Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt instance"),
      }
    }
    instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    Ok(instances)
  }
}

#[async_trait]
impl InstanceStore for FsInstanceStore {
  async fn save(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
    let path = self.path_for(&instance.instance_id)?;
    fs::create_dir_all(&self.root).await?;

    // Write then rename so readers never see a half-written document.
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(instance)?;
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, &path).await?;
    Ok(())
  }

  async fn load(&self, instance_id: &str) -> Result<WorkflowInstance, StoreError> {
    let path = self.path_for(instance_id)?;
    let content = match fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(StoreError::NotFound(instance_id.to_string()));
      }
      Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
  }

  async fn list(&self) -> Result<Vec<InstanceSummary>, StoreError> {
    Ok(
      self
        .read_all()
        .await?
        .iter()
        .map(WorkflowInstance::summary)
        .collect(),
    )
  }

  async fn find_bookmarks(&self, trigger: &TriggerIdentity) -> Result<Vec<Bookmark>, StoreError> {
    Ok(
      self
        .read_all()
        .await?
        .into_iter()
        .flat_map(|i| i.bookmarks)
        .filter(|b| &b.trigger == trigger)
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::TempDir;
  use trellis_state::{INSTANCE_SCOPE, InstanceStatus};

  fn instance(id: &str) -> WorkflowInstance {
    let mut instance = WorkflowInstance::new(id, "orders", 1);
    instance
      .scopes
      .write(INSTANCE_SCOPE, "input", json!({"order": 1}))
      .unwrap();
    instance
  }

  #[tokio::test]
  async fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let store = FsInstanceStore::new(dir.path().join("instances"));

    let saved = instance("i-1");
    store.save(&saved).await.unwrap();
    let loaded = store.load("i-1").await.unwrap();

    assert_eq!(loaded, saved);
  }

  #[tokio::test]
  async fn test_load_missing() {
    let dir = TempDir::new().unwrap();
    let store = FsInstanceStore::new(dir.path());

    assert!(matches!(
      store.load("nope").await,
      Err(StoreError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_rejects_path_like_ids() {
    let dir = TempDir::new().unwrap();
    let store = FsInstanceStore::new(dir.path());

    assert!(matches!(
      store.load("../etc/passwd").await,
      Err(StoreError::InvalidId(_))
    ));
  }

  #[tokio::test]
  async fn test_list_sorted() {
    let dir = TempDir::new().unwrap();
    let store = FsInstanceStore::new(dir.path());
    assert!(store.list().await.unwrap().is_empty());

    let mut done = instance("b");
    done.status = InstanceStatus::Completed;
    store.save(&done).await.unwrap();
    store.save(&instance("a")).await.unwrap();

    let summaries = store.list().await.unwrap();
    let ids: Vec<_> = summaries.iter().map(|s| s.instance_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(summaries[1].status, InstanceStatus::Completed);
  }

  #[tokio::test]
  async fn test_corrupt_document_is_skipped() {
    let dir = TempDir::new().unwrap();
    let store = FsInstanceStore::new(dir.path());

    let mut waiting = instance("good");
    let leaf = waiting.push_pointer("wait", None, INSTANCE_SCOPE, false);
    waiting.add_bookmark(leaf, "wait", TriggerIdentity::new("orders"), None);
    store.save(&waiting).await.unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

    let summaries = store.list().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].instance_id, "good");

    let bookmarks = store
      .find_bookmarks(&TriggerIdentity::new("orders"))
      .await
      .unwrap();
    assert_eq!(bookmarks.len(), 1);
    assert_eq!(bookmarks[0].instance_id, "good");

    // Loading it directly still reports the damage.
    assert!(matches!(
      store.load("broken").await,
      Err(StoreError::Serialization(_))
    ));
  }
}
