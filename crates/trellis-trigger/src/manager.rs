use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::error::TriggerError;
use crate::event::Delivery;
use crate::identity::TriggerIdentity;
use crate::transport::TriggerTransport;
use crate::worker::{Worker, WorkerState};

/// Registry of shared trigger workers.
///
/// At most one worker exists per identity. Concurrent `start_worker` calls
/// for the same identity are serialized by a per-identity gate so that
/// exactly one of them opens the transport; the rest only bump the count.
pub struct WorkerManager {
  transport: Arc<dyn TriggerTransport>,
  deliveries: mpsc::Sender<Delivery>,
  workers: RwLock<HashMap<TriggerIdentity, Arc<Worker>>>,
  gates: Mutex<HashMap<TriggerIdentity, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkerManager {
  pub fn new(transport: Arc<dyn TriggerTransport>, deliveries: mpsc::Sender<Delivery>) -> Self {
    Self {
      transport,
      deliveries,
      workers: RwLock::new(HashMap::new()),
      gates: Mutex::new(HashMap::new()),
    }
  }

  /// Create a manager together with the receiving end of its delivery channel.
  pub fn channel(
    transport: Arc<dyn TriggerTransport>,
    capacity: usize,
  ) -> (Self, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Self::new(transport, tx), rx)
  }

  pub fn find_worker(&self, identity: &TriggerIdentity) -> Option<Arc<Worker>> {
    self
      .workers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(identity)
      .cloned()
  }

  /// Snapshot of all live workers.
  pub fn workers(&self) -> Vec<Arc<Worker>> {
    let mut workers: Vec<_> = self
      .workers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    workers.sort_by(|a, b| a.identity().cmp(b.identity()));
    workers
  }

  /// Start a worker for `identity`, or increment the count of the existing one.
  ///
  /// A registered worker whose listener could not be reopened is relistened
  /// before it is retained.
  #[instrument(name = "start_worker", skip(self), fields(trigger = %identity))]
  pub async fn start_worker(&self, identity: &TriggerIdentity) -> Result<Arc<Worker>, TriggerError> {
    identity.validate()?;

    let gate = self.gate(identity);
    let guard = gate.lock().await;

    if let Some(worker) = self.find_worker(identity) {
      if worker.state() == WorkerState::Stopped {
        self.relisten(&worker).await?;
      }
      let count = worker.retain();
      info!(ref_count = count, "worker_retained");
      return Ok(worker);
    }

    let worker = Arc::new(Worker::new(identity.clone()));
    if let Err(e) = self.relisten(&worker).await {
      drop(guard);
      self.prune_gate(identity, &gate);
      return Err(e);
    }

    self
      .workers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(identity.clone(), worker.clone());

    info!("worker_started");
    Ok(worker)
  }

  /// Decrement the count for `identity`; at zero the worker is stopped and removed.
  ///
  /// Stopping an identity without a worker is a no-op.
  #[instrument(name = "stop_worker", skip(self), fields(trigger = %identity))]
  pub async fn stop_worker(&self, identity: &TriggerIdentity) -> Result<(), TriggerError> {
    identity.validate()?;

    let gate = self.gate(identity);
    let guard = gate.lock().await;

    let Some(worker) = self.find_worker(identity) else {
      drop(guard);
      self.prune_gate(identity, &gate);
      return Ok(());
    };

    let remaining = worker.release();
    if remaining > 0 {
      info!(ref_count = remaining, "worker_released");
      return Ok(());
    }

    self.detach(&worker);
    self.teardown(&worker).await;
    drop(guard);
    self.prune_gate(identity, &gate);
    info!("worker_stopped");
    Ok(())
  }

  /// Remove a worker regardless of its count.
  #[instrument(name = "remove_worker", skip(self, worker), fields(trigger = %worker.identity()))]
  pub async fn remove_worker(&self, worker: &Arc<Worker>) {
    let gate = self.gate(worker.identity());
    let guard = gate.lock().await;

    self.detach(worker);
    self.teardown(worker).await;
    drop(guard);
    self.prune_gate(worker.identity(), &gate);
    info!(ref_count = worker.ref_count(), "worker_removed");
  }

  /// Reopen the listener of a worker whose transport went away.
  ///
  /// The worker keeps its identity in the registry and its count, so every
  /// reference taken before the loss is still released against it. Returns
  /// `None` when there is no worker or its listener is still running.
  #[instrument(name = "restart_worker", skip(self), fields(trigger = %identity))]
  pub async fn restart_worker(
    &self,
    identity: &TriggerIdentity,
  ) -> Result<Option<Arc<Worker>>, TriggerError> {
    let gate = self.gate(identity);
    let _guard = gate.lock().await;

    let Some(worker) = self.find_worker(identity) else {
      return Ok(None);
    };
    if worker.is_listening() {
      return Ok(None);
    }

    worker.halt_listener().await;
    self.transport.close(identity).await;
    self.relisten(&worker).await?;
    info!(ref_count = worker.ref_count(), "worker_restarted");
    Ok(Some(worker))
  }

  /// Stop every worker.
  pub async fn shutdown(&self) {
    let workers: Vec<_> = self
      .workers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .drain()
      .map(|(_, worker)| worker)
      .collect();

    for worker in &workers {
      self.teardown(worker).await;
    }
    if !workers.is_empty() {
      info!(count = workers.len(), "workers_shutdown");
    }
  }

  fn gate(&self, identity: &TriggerIdentity) -> Arc<tokio::sync::Mutex<()>> {
    self
      .gates
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(identity.clone())
      .or_default()
      .clone()
  }

  /// Forget the gate for `identity` once nobody else holds or waits on it
  /// and no worker is registered.
  fn prune_gate(&self, identity: &TriggerIdentity, gate: &Arc<tokio::sync::Mutex<()>>) {
    let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
    // One reference in the map, one held by the caller.
    if Arc::strong_count(gate) == 2 && self.find_worker(identity).is_none() {
      gates.remove(identity);
    }
  }

  #[cfg(test)]
  fn gate_count(&self) -> usize {
    self.gates.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// Open the transport and spawn a listener for `worker`.
  async fn relisten(&self, worker: &Worker) -> Result<(), TriggerError> {
    worker.set_state(WorkerState::Starting);
    match self.transport.listen(worker.identity()).await {
      Ok(receiver) => {
        worker.spawn_listener(receiver, self.deliveries.clone());
        worker.set_state(WorkerState::Running);
        Ok(())
      }
      Err(e) => {
        worker.set_state(WorkerState::Stopped);
        Err(e)
      }
    }
  }

  /// Drop the registry entry if it still points at this worker.
  fn detach(&self, worker: &Arc<Worker>) {
    let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
    if workers
      .get(worker.identity())
      .is_some_and(|current| Arc::ptr_eq(current, worker))
    {
      workers.remove(worker.identity());
    } else {
      warn!(trigger = %worker.identity(), "worker not registered");
    }
  }

  async fn teardown(&self, worker: &Worker) {
    if worker.stop().await {
      self.transport.close(worker.identity()).await;
    }
  }
}
