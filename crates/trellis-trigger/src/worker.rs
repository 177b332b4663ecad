use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{Delivery, TriggerEvent};
use crate::identity::TriggerIdentity;

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
  Starting,
  Running,
  Stopping,
  Stopped,
}

/// A listener on one trigger identity, shared by every bookmark on it.
pub struct Worker {
  identity: TriggerIdentity,
  ref_count: AtomicUsize,
  state: Mutex<WorkerState>,
  listener: Mutex<Option<Listener>>,
}

struct Listener {
  cancel: CancellationToken,
  /// Set before the loss of the transport is reported.
  closed: Arc<AtomicBool>,
  task: JoinHandle<()>,
}

impl Worker {
  pub(crate) fn new(identity: TriggerIdentity) -> Self {
    Self {
      identity,
      ref_count: AtomicUsize::new(1),
      state: Mutex::new(WorkerState::Starting),
      listener: Mutex::new(None),
    }
  }

  pub fn identity(&self) -> &TriggerIdentity {
    &self.identity
  }

  /// Number of outstanding bookmarks using this worker.
  pub fn ref_count(&self) -> usize {
    self.ref_count.load(Ordering::SeqCst)
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  pub(crate) fn retain(&self) -> usize {
    self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Decrement the count, never going below zero. Returns the new count.
  pub(crate) fn release(&self) -> usize {
    let previous = self
      .ref_count
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
        Some(n.saturating_sub(1))
      })
      .unwrap_or_default();
    previous.saturating_sub(1)
  }

  /// Spawn the listen loop forwarding events into `deliveries`.
  ///
  /// Replaces any previous listener, which must already be halted.
  pub(crate) fn spawn_listener(
    &self,
    receiver: mpsc::Receiver<TriggerEvent>,
    deliveries: mpsc::Sender<Delivery>,
  ) {
    let cancel = CancellationToken::new();
    let closed = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn(listen(
      self.identity.clone(),
      receiver,
      deliveries,
      cancel.clone(),
      closed.clone(),
    ));
    let listener = Listener {
      cancel,
      closed,
      task,
    };
    *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
  }

  /// True while a listen loop is still forwarding events.
  pub fn is_listening(&self) -> bool {
    self
      .listener
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .is_some_and(|listener| {
        !listener.closed.load(Ordering::SeqCst) && !listener.task.is_finished()
      })
  }

  /// Cancel the current listen loop, if any, and wait for it to finish.
  pub(crate) async fn halt_listener(&self) {
    let listener = self
      .listener
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(Listener { cancel, task, .. }) = listener {
      cancel.cancel();
      if let Err(e) = task.await {
        warn!(trigger = %self.identity, error = %e, "worker task ended abnormally");
      }
    }
  }

  /// Cancel the listen loop and wait for it to finish.
  ///
  /// Returns `false` if the worker was already stopping or stopped.
  pub(crate) async fn stop(&self) -> bool {
    {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      if matches!(*state, WorkerState::Stopping | WorkerState::Stopped) {
        return false;
      }
      *state = WorkerState::Stopping;
    }

    self.halt_listener().await;
    self.set_state(WorkerState::Stopped);
    true
  }
}

impl std::fmt::Debug for Worker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Worker")
      .field("identity", &self.identity)
      .field("ref_count", &self.ref_count())
      .field("state", &self.state())
      .finish()
  }
}

async fn listen(
  identity: TriggerIdentity,
  mut receiver: mpsc::Receiver<TriggerEvent>,
  deliveries: mpsc::Sender<Delivery>,
  cancel: CancellationToken,
  closed: Arc<AtomicBool>,
) {
  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        debug!(trigger = %identity, "worker cancelled");
        break;
      }
      event = receiver.recv() => match event {
        Some(event) => {
          debug!(trigger = %identity, event_id = %event.event_id, "trigger_event_received");
          let delivery = Delivery::Event { identity: identity.clone(), event };
          if !forward(&deliveries, delivery, &cancel).await {
            if !cancel.is_cancelled() {
              warn!(trigger = %identity, "delivery channel closed, worker exiting");
            }
            break;
          }
        }
        None => {
          warn!(trigger = %identity, "trigger transport closed");
          closed.store(true, Ordering::SeqCst);
          let lost = Delivery::TransportClosed { identity: identity.clone() };
          if !forward(&deliveries, lost, &cancel).await {
            debug!(trigger = %identity, "transport loss not reported, delivery channel closed");
          }
          break;
        }
      }
    }
  }
}

/// Send one delivery unless cancelled first. Returns `false` if it was not sent.
async fn forward(
  deliveries: &mpsc::Sender<Delivery>,
  delivery: Delivery,
  cancel: &CancellationToken,
) -> bool {
  tokio::select! {
    biased;
    _ = cancel.cancelled() => false,
    sent = deliveries.send(delivery) => sent.is_ok(),
  }
}
