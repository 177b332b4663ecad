use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TriggerError;
use crate::event::TriggerEvent;
use crate::identity::TriggerIdentity;

/// Connection to an external message source.
///
/// `listen` opens a subscription and hands back the receiving end. When the
/// sender side drops without `close` having been called, the worker reports
/// the identity as [`Delivery::TransportClosed`](crate::Delivery::TransportClosed).
#[async_trait]
pub trait TriggerTransport: Send + Sync {
  async fn listen(
    &self,
    identity: &TriggerIdentity,
  ) -> Result<mpsc::Receiver<TriggerEvent>, TriggerError>;

  /// Release the subscription for this identity.
  async fn close(&self, identity: &TriggerIdentity);
}

/// In-process transport backed by bounded channels.
///
/// Used by tests and the CLI. Events published on an identity nobody listens
/// on are dropped.
pub struct InMemoryTransport {
  capacity: usize,
  subscriptions: Mutex<HashMap<TriggerIdentity, mpsc::Sender<TriggerEvent>>>,
  listen_calls: AtomicUsize,
}

impl InMemoryTransport {
  pub fn new() -> Self {
    Self::with_capacity(64)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      subscriptions: Mutex::new(HashMap::new()),
      listen_calls: AtomicUsize::new(0),
    }
  }

  /// Publish an event. Returns `false` when no subscription is open.
  pub async fn publish(&self, identity: &TriggerIdentity, event: TriggerEvent) -> bool {
    let sender = self
      .subscriptions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(identity)
      .cloned();

    match sender {
      Some(sender) => sender.send(event).await.is_ok(),
      None => false,
    }
  }

  /// Drop the subscription as if the broker went away.
  pub fn disconnect(&self, identity: &TriggerIdentity) -> bool {
    self
      .subscriptions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(identity)
      .is_some()
  }

  pub fn is_listening(&self, identity: &TriggerIdentity) -> bool {
    self
      .subscriptions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(identity)
  }

  /// Total number of `listen` calls served.
  pub fn listen_count(&self) -> usize {
    self.listen_calls.load(Ordering::SeqCst)
  }
}

impl Default for InMemoryTransport {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl TriggerTransport for InMemoryTransport {
  async fn listen(
    &self,
    identity: &TriggerIdentity,
  ) -> Result<mpsc::Receiver<TriggerEvent>, TriggerError> {
    // Give concurrent starters a chance to interleave.
    tokio::task::yield_now().await;

    let (tx, rx) = mpsc::channel(self.capacity);
    self
      .subscriptions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(identity.clone(), tx);
    self.listen_calls.fetch_add(1, Ordering::SeqCst);
    Ok(rx)
  }

  async fn close(&self, identity: &TriggerIdentity) {
    self.disconnect(identity);
  }
}
