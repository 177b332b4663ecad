//! Which bookmarks hold a worker reference.
//!
//! Every outstanding bookmark should own exactly one reference on the worker
//! for its trigger. Starting that worker can fail, so the host records the
//! outcome per bookmark: a bookmark that never got its reference must not
//! give one back, and is retried until it does.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};
use trellis_state::Bookmark;
use trellis_trigger::{TriggerIdentity, WorkerManager};

/// Instance id and bookmark id.
type LeaseKey = (String, String);

fn key(bookmark: &Bookmark) -> LeaseKey {
  (bookmark.instance_id.clone(), bookmark.bookmark_id.clone())
}

#[derive(Default)]
struct LeaseTable {
  held: HashSet<LeaseKey>,
  pending: HashMap<LeaseKey, TriggerIdentity>,
}

#[derive(Default)]
pub(crate) struct WorkerLeases {
  table: Mutex<LeaseTable>,
}

impl WorkerLeases {
  fn table(&self) -> std::sync::MutexGuard<'_, LeaseTable> {
    self.table.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Take a worker reference for `bookmark`. Returns `false` if the worker
  /// could not be started; the bookmark is then pending.
  ///
  /// Acquiring a bookmark that already holds or awaits a reference is a no-op.
  pub(crate) async fn acquire(&self, workers: &WorkerManager, bookmark: &Bookmark) -> bool {
    let key = key(bookmark);
    {
      let table = self.table();
      if table.held.contains(&key) {
        return true;
      }
      if table.pending.contains_key(&key) {
        return false;
      }
    }

    match workers.start_worker(&bookmark.trigger).await {
      Ok(_) => {
        self.table().held.insert(key);
        true
      }
      Err(e) => {
        warn!(
          trigger = %bookmark.trigger,
          bookmark_id = %bookmark.bookmark_id,
          error = %e,
          "worker unavailable, bookmark pending"
        );
        self.table().pending.insert(key, bookmark.trigger.clone());
        false
      }
    }
  }

  /// Give back the reference `bookmark` holds, if it holds one.
  pub(crate) async fn release(&self, workers: &WorkerManager, bookmark: &Bookmark) {
    let key = key(bookmark);
    let held = {
      let mut table = self.table();
      table.pending.remove(&key);
      table.held.remove(&key)
    };

    if !held {
      debug!(bookmark_id = %bookmark.bookmark_id, "bookmark held no worker reference");
      return;
    }
    if let Err(e) = workers.stop_worker(&bookmark.trigger).await {
      warn!(trigger = %bookmark.trigger, error = %e, "failed to stop worker");
    }
  }

  /// Try again to start workers for pending bookmarks. Returns how many got
  /// their reference.
  pub(crate) async fn retry(&self, workers: &WorkerManager) -> usize {
    let pending: Vec<_> = self
      .table()
      .pending
      .iter()
      .map(|(key, trigger)| (key.clone(), trigger.clone()))
      .collect();

    let mut acquired = 0;
    for (key, trigger) in pending {
      if let Err(e) = workers.start_worker(&trigger).await {
        debug!(trigger = %trigger, error = %e, "worker still unavailable");
        continue;
      }

      let still_pending = {
        let mut table = self.table();
        let still_pending = table.pending.remove(&key).is_some();
        if still_pending {
          table.held.insert(key);
        }
        still_pending
      };
      if still_pending {
        acquired += 1;
      } else if let Err(e) = workers.stop_worker(&trigger).await {
        // Released while the worker was starting.
        warn!(trigger = %trigger, error = %e, "failed to stop worker");
      }
    }

    if acquired > 0 {
      info!(acquired, "pending_workers_started");
    }
    acquired
  }

  pub(crate) fn pending(&self) -> usize {
    self.table().pending.len()
  }

  pub(crate) fn clear(&self) {
    let mut table = self.table();
    table.held.clear();
    table.pending.clear();
  }
}
