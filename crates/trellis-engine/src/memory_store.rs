use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use trellis_state::{Bookmark, InstanceSummary, WorkflowInstance};
use trellis_trigger::TriggerIdentity;

use crate::store::{InstanceStore, StoreError};

/// Keeps instances in memory. Contents are lost with the process.
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
  instances: RwLock<BTreeMap<String, WorkflowInstance>>,
}

impl InMemoryInstanceStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn len(&self) -> usize {
    self.instances.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.instances.read().await.is_empty()
  }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
  async fn save(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
    self
      .instances
      .write()
      .await
      .insert(instance.instance_id.clone(), instance.clone());
    Ok(())
  }

  async fn load(&self, instance_id: &str) -> Result<WorkflowInstance, StoreError> {
    self
      .instances
      .read()
      .await
      .get(instance_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))
  }

  async fn list(&self) -> Result<Vec<InstanceSummary>, StoreError> {
    Ok(
      self
        .instances
        .read()
        .await
        .values()
        .map(WorkflowInstance::summary)
        .collect(),
    )
  }

  async fn find_bookmarks(&self, trigger: &TriggerIdentity) -> Result<Vec<Bookmark>, StoreError> {
    Ok(
      self
        .instances
        .read()
        .await
        .values()
        .flat_map(|i| i.bookmarks.iter())
        .filter(|b| &b.trigger == trigger)
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_state::INSTANCE_SCOPE;

  #[tokio::test]
  async fn test_save_load_and_find() {
    let store = InMemoryInstanceStore::new();
    let mut instance = WorkflowInstance::new("i-1", "w", 1);
    let p = instance.push_pointer("wait", None, INSTANCE_SCOPE, false);
    instance.add_bookmark(p, "wait", TriggerIdentity::new("T"), None);
    store.save(&instance).await.unwrap();

    assert_eq!(store.load("i-1").await.unwrap(), instance);
    assert!(matches!(
      store.load("missing").await,
      Err(StoreError::NotFound(_))
    ));
    assert_eq!(
      store
        .find_bookmarks(&TriggerIdentity::new("T"))
        .await
        .unwrap()
        .len(),
      1
    );
    assert!(
      store
        .find_bookmarks(&TriggerIdentity::new("U"))
        .await
        .unwrap()
        .is_empty()
    );
  }
}
