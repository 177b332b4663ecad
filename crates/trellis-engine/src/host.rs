//! Hosting many workflow instances in one process.
//!
//! Every instance that is touched gets a mailbox: an mpsc channel drained by
//! a single task that owns the instance. Starting, resuming and cancelling
//! all go through that task, so one instance never has two writers while
//! different instances progress in parallel.
//!
//! After each command the mailbox persists the instance and brings the
//! shared [`WorkerManager`] in line with the bookmarks that were created or
//! removed: one worker reference per outstanding bookmark. Bookmarks whose
//! worker could not be started stay pending and are retried from
//! [`WorkflowHost::run`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use trellis_config::WorkflowDef;
use trellis_state::{InstanceStatus, InstanceSummary, WorkflowInstance};
use trellis_trigger::{Delivery, TriggerEvent, TriggerIdentity, WorkerManager, WorkerState};
use trellis_workflow::Workflow;

use crate::engine::{Engine, StepReport};
use crate::error::EngineError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::leases::WorkerLeases;
use crate::store::{InstanceStore, StoreError};

/// Host settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
  /// Buffered commands per instance mailbox.
  pub mailbox_capacity: usize,
  /// Buffered worker deliveries.
  pub delivery_capacity: usize,
  /// How often `run` retries workers that failed to start.
  pub worker_retry_interval: Duration,
}

impl Default for HostConfig {
  fn default() -> Self {
    Self {
      mailbox_capacity: 32,
      delivery_capacity: 100,
      worker_retry_interval: Duration::from_secs(5),
    }
  }
}

/// Outcome of routing one trigger event.
#[derive(Debug, Default)]
pub struct DispatchReport {
  pub resumed: Vec<StepReport>,
  /// Bookmarks that had already been consumed or discarded.
  pub stale: Vec<String>,
  /// Bookmark id and error for resumes that failed.
  pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
  pub workers_started: usize,
  /// Bookmarks whose worker could not be started yet.
  pub workers_pending: usize,
  pub instances_advanced: usize,
  pub failed: Vec<String>,
}

type Reply = oneshot::Sender<Result<StepReport, EngineError>>;

enum Command {
  Advance {
    reply: Reply,
  },
  Resume {
    bookmark_id: String,
    payload: Value,
    reply: Reply,
  },
  Cancel {
    reply: Reply,
  },
}

/// Runs workflow instances against an engine, a store and a worker registry.
///
/// # Usage
///
/// ```ignore
/// let transport = Arc::new(InMemoryTransport::new());
/// let (workers, deliveries) = WorkerManager::channel(transport, config.delivery_capacity);
/// let host = WorkflowHost::new(engine, store, Arc::new(workers), config);
///
/// host.register(definition)?;
/// host.recover().await?;
///
/// let cancel = CancellationToken::new();
/// tokio::spawn({
///   let host = host.clone();
///   async move { host.run(deliveries, cancel).await }
/// });
/// ```
pub struct WorkflowHost<N: ExecutionNotifier + 'static = NoopNotifier> {
  inner: Arc<HostInner<N>>,
}

impl<N: ExecutionNotifier + 'static> Clone for WorkflowHost<N> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

struct HostInner<N: ExecutionNotifier> {
  engine: Engine<N>,
  store: Arc<dyn InstanceStore>,
  workers: Arc<WorkerManager>,
  /// Registered definitions by id, then version.
  workflows: RwLock<HashMap<String, BTreeMap<u32, Arc<Workflow>>>>,
  leases: WorkerLeases,
  mailboxes: Mutex<HashMap<String, mpsc::Sender<Command>>>,
  config: HostConfig,
  cancel: CancellationToken,
}

impl<N: ExecutionNotifier + 'static> WorkflowHost<N> {
  pub fn new(
    engine: Engine<N>,
    store: Arc<dyn InstanceStore>,
    workers: Arc<WorkerManager>,
    config: HostConfig,
  ) -> Self {
    Self {
      inner: Arc::new(HostInner {
        engine,
        store,
        workers,
        workflows: RwLock::new(HashMap::new()),
        leases: WorkerLeases::default(),
        mailboxes: Mutex::new(HashMap::new()),
        config,
        cancel: CancellationToken::new(),
      }),
    }
  }

  pub fn engine(&self) -> &Engine<N> {
    &self.inner.engine
  }

  pub fn workers(&self) -> &WorkerManager {
    &self.inner.workers
  }

  pub fn store(&self) -> &dyn InstanceStore {
    self.inner.store.as_ref()
  }

  /// Load, validate and register a definition.
  ///
  /// Versions accumulate: new instances start on the highest registered
  /// version while existing instances keep running on the one they started
  /// with. Registering the same id and version again replaces it.
  pub fn register(&self, def: WorkflowDef) -> Result<Arc<Workflow>, EngineError> {
    let workflow = Arc::new(Workflow::load(def)?);
    self.inner.engine.validate(&workflow)?;

    info!(
      workflow_id = %workflow.workflow_id,
      version = workflow.version,
      nodes = workflow.len(),
      "workflow_registered"
    );
    self
      .inner
      .workflows
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(workflow.workflow_id.clone())
      .or_default()
      .insert(workflow.version, workflow.clone());
    Ok(workflow)
  }

  /// Highest registered version of a workflow.
  pub fn workflow(&self, workflow_id: &str) -> Result<Arc<Workflow>, EngineError> {
    self
      .inner
      .workflows
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(workflow_id)
      .and_then(|versions| versions.values().next_back())
      .cloned()
      .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.to_string()))
  }

  pub fn workflow_version(
    &self,
    workflow_id: &str,
    version: u32,
  ) -> Result<Arc<Workflow>, EngineError> {
    self
      .inner
      .workflows
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(workflow_id)
      .and_then(|versions| versions.get(&version))
      .cloned()
      .ok_or_else(|| EngineError::UnknownWorkflow(format!("{workflow_id} v{version}")))
  }

  /// Create an instance of a registered workflow and advance it.
  #[instrument(name = "start_workflow", skip(self, input))]
  pub async fn start_workflow(
    &self,
    workflow_id: &str,
    input: Value,
    correlation_id: Option<String>,
  ) -> Result<StepReport, EngineError> {
    let workflow = self.workflow(workflow_id)?;
    let instance_id = uuid::Uuid::new_v4().to_string();

    let mut instance = self
      .inner
      .engine
      .instantiate(&workflow, &instance_id, input)?;
    instance.correlation_id = correlation_id;
    self.inner.store.save(&instance).await?;

    {
      let mut mailboxes = self.inner.mailboxes.lock().await;
      self.open_mailbox(&mut mailboxes, instance, workflow);
    }
    self
      .request(&instance_id, |reply| Command::Advance { reply })
      .await
  }

  /// Resume one bookmark of one instance.
  pub async fn resume(
    &self,
    instance_id: &str,
    bookmark_id: &str,
    payload: Value,
  ) -> Result<StepReport, EngineError> {
    self
      .request(instance_id, |reply| Command::Resume {
        bookmark_id: bookmark_id.to_string(),
        payload: payload.clone(),
        reply,
      })
      .await
  }

  pub async fn cancel(&self, instance_id: &str) -> Result<StepReport, EngineError> {
    self
      .request(instance_id, |reply| Command::Cancel { reply })
      .await
  }

  /// Latest persisted state of an instance.
  pub async fn instance(&self, instance_id: &str) -> Result<WorkflowInstance, EngineError> {
    match self.inner.store.load(instance_id).await {
      Ok(instance) => Ok(instance),
      Err(StoreError::NotFound(_)) => Err(EngineError::InstanceNotFound(instance_id.to_string())),
      Err(e) => Err(e.into()),
    }
  }

  pub async fn instances(&self) -> Result<Vec<InstanceSummary>, EngineError> {
    Ok(self.inner.store.list().await?)
  }

  /// Resume every bookmark an event on `trigger` matches.
  ///
  /// Stale matches (already consumed, or the instance is gone) are reported,
  /// never treated as failures.
  #[instrument(name = "dispatch", skip(self, event), fields(trigger = %trigger, event_id = %event.event_id))]
  pub async fn dispatch(
    &self,
    trigger: &TriggerIdentity,
    event: &TriggerEvent,
  ) -> Result<DispatchReport, EngineError> {
    let matching: Vec<_> = self
      .inner
      .store
      .find_bookmarks(trigger)
      .await?
      .into_iter()
      .filter(|b| b.matches(trigger, event.correlation.as_ref()))
      .collect();

    if matching.is_empty() {
      debug!("no bookmark matched trigger event");
    }

    let results = join_all(matching.iter().map(|bookmark| async move {
      let result = self
        .resume(&bookmark.instance_id, &bookmark.bookmark_id, event.payload.clone())
        .await;
      (bookmark, result)
    }))
    .await;

    let mut report = DispatchReport::default();
    for (bookmark, result) in results {
      match result {
        Ok(step) => report.resumed.push(step),
        Err(EngineError::BookmarkNotFound(_) | EngineError::InstanceNotFound(_)) => {
          warn!(bookmark_id = %bookmark.bookmark_id, "stale bookmark, event dropped");
          report.stale.push(bookmark.bookmark_id.clone());
        }
        Err(e) => {
          error!(bookmark_id = %bookmark.bookmark_id, error = %e, "resume failed");
          report
            .failed
            .push((bookmark.bookmark_id.clone(), e.to_string()));
        }
      }
    }

    info!(
      resumed = report.resumed.len(),
      stale = report.stale.len(),
      failed = report.failed.len(),
      "trigger_event_dispatched"
    );
    Ok(report)
  }

  /// Restore runtime state after a restart.
  ///
  /// Starts one worker reference per persisted bookmark and re-advances
  /// instances that were running when the process stopped. Call once, before
  /// [`run`](Self::run).
  #[instrument(name = "recover", skip(self))]
  pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
    let mut report = RecoveryReport::default();

    for summary in self.inner.store.list().await? {
      if summary.status.is_terminal() {
        continue;
      }
      let instance = self.inner.store.load(&summary.instance_id).await?;
      for bookmark in &instance.bookmarks {
        if self.inner.leases.acquire(&self.inner.workers, bookmark).await {
          report.workers_started += 1;
        } else {
          report.workers_pending += 1;
        }
      }

      if instance.status == InstanceStatus::Running {
        match self
          .request(&instance.instance_id, |reply| Command::Advance { reply })
          .await
        {
          Ok(_) => report.instances_advanced += 1,
          Err(e) => {
            error!(instance_id = %instance.instance_id, error = %e, "recovery advance failed");
            report.failed.push(instance.instance_id.clone());
          }
        }
      }
    }

    info!(
      workers_started = report.workers_started,
      workers_pending = report.workers_pending,
      instances_advanced = report.instances_advanced,
      "host_recovered"
    );
    Ok(report)
  }

  /// Drain worker deliveries until cancelled or the channel closes.
  ///
  /// Pending worker references, and workers whose restart failed, are retried
  /// every [`worker_retry_interval`](HostConfig::worker_retry_interval).
  pub async fn run(&self, mut deliveries: mpsc::Receiver<Delivery>, cancel: CancellationToken) {
    info!("starting workflow host");
    let mut retry = tokio::time::interval(self.inner.config.worker_retry_interval);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("workflow host cancelled");
          break;
        }
        _ = retry.tick() => {
          if self.inner.leases.pending() > 0 {
            self.retry_workers().await;
          }
          // Workers whose restart failed keep their references until reopened.
          for worker in self.inner.workers.workers() {
            if worker.state() == WorkerState::Stopped {
              self.restart_worker(worker.identity()).await;
            }
          }
        }
        delivery = deliveries.recv() => match delivery {
          Some(Delivery::Event { identity, event }) => {
            if let Err(e) = self.dispatch(&identity, &event).await {
              error!(trigger = %identity, error = %e, "trigger event dispatch failed");
            }
          }
          Some(Delivery::TransportClosed { identity }) => self.restart_worker(&identity).await,
          None => {
            info!("delivery channel closed");
            break;
          }
        }
      }
    }
  }

  /// Start workers for bookmarks that are still waiting on one. Returns how
  /// many bookmarks got their reference.
  pub async fn retry_workers(&self) -> usize {
    self.inner.leases.retry(&self.inner.workers).await
  }

  /// Bookmarks whose worker could not be started yet.
  pub fn pending_workers(&self) -> usize {
    self.inner.leases.pending()
  }

  /// Stop all mailboxes and workers.
  pub async fn shutdown(&self) {
    self.inner.cancel.cancel();
    self.inner.mailboxes.lock().await.clear();
    self.inner.workers.shutdown().await;
    self.inner.leases.clear();
    info!("workflow host shut down");
  }

  /// Reopen the listener of a worker whose transport went away.
  async fn restart_worker(&self, identity: &TriggerIdentity) {
    match self.inner.workers.restart_worker(identity).await {
      Ok(Some(worker)) => warn!(
        trigger = %identity,
        references = worker.ref_count(),
        "worker restarted after transport loss"
      ),
      Ok(None) => debug!(trigger = %identity, "no worker to restart"),
      Err(e) => error!(trigger = %identity, error = %e, "worker restart failed"),
    }
  }

  /// Send a command to an instance's mailbox and wait for the reply.
  async fn request<F>(&self, instance_id: &str, command: F) -> Result<StepReport, EngineError>
  where
    F: Fn(Reply) -> Command,
  {
    // A mailbox can close between lookup and send when its instance turns
    // terminal; the second attempt opens a fresh one.
    for _ in 0..2 {
      let mailbox = self.mailbox(instance_id).await?;
      let (reply, response) = oneshot::channel();
      if mailbox.send(command(reply)).await.is_err() {
        continue;
      }
      return response
        .await
        .map_err(|_| EngineError::MailboxClosed(instance_id.to_string()))?;
    }
    Err(EngineError::MailboxClosed(instance_id.to_string()))
  }

  async fn mailbox(&self, instance_id: &str) -> Result<mpsc::Sender<Command>, EngineError> {
    let mut mailboxes = self.inner.mailboxes.lock().await;
    if let Some(mailbox) = mailboxes.get(instance_id)
      && !mailbox.is_closed()
    {
      return Ok(mailbox.clone());
    }

    let instance = self.instance(instance_id).await?;
    let workflow = self.workflow_version(&instance.workflow_id, instance.workflow_version)?;
    Ok(self.open_mailbox(&mut mailboxes, instance, workflow))
  }

  fn open_mailbox(
    &self,
    mailboxes: &mut HashMap<String, mpsc::Sender<Command>>,
    instance: WorkflowInstance,
    workflow: Arc<Workflow>,
  ) -> mpsc::Sender<Command> {
    let (sender, receiver) = mpsc::channel(self.inner.config.mailbox_capacity.max(1));
    mailboxes.insert(instance.instance_id.clone(), sender.clone());

    let mailbox = Mailbox {
      inner: self.inner.clone(),
      instance,
      workflow,
      receiver,
    };
    tokio::spawn(mailbox.run());
    sender
  }
}

/// Single owner of one instance.
struct Mailbox<N: ExecutionNotifier + 'static> {
  inner: Arc<HostInner<N>>,
  instance: WorkflowInstance,
  workflow: Arc<Workflow>,
  receiver: mpsc::Receiver<Command>,
}

impl<N: ExecutionNotifier + 'static> Mailbox<N> {
  async fn run(mut self) {
    let instance_id = self.instance.instance_id.clone();
    debug!(instance_id = %instance_id, "mailbox_opened");

    let mut closing = false;
    while let Some(command) = self.receiver.recv().await {
      self.handle(command).await;

      // Terminal instances stop accepting work. Commands already queued are
      // still answered before the task exits.
      if self.instance.status.is_terminal() && !closing {
        closing = true;
        self.receiver.close();
        let mut mailboxes = self.inner.mailboxes.lock().await;
        if mailboxes.get(&instance_id).is_some_and(|m| m.is_closed()) {
          mailboxes.remove(&instance_id);
        }
      }
    }

    debug!(instance_id = %instance_id, "mailbox_closed");
  }

  async fn handle(&mut self, command: Command) {
    let inner = self.inner.clone();
    let cancel = inner.cancel.child_token();
    let snapshot = self.instance.clone();

    match command {
      Command::Advance { reply } => {
        let result = inner
          .engine
          .advance(&self.workflow, &mut self.instance, &cancel)
          .await;
        let _ = reply.send(self.commit(snapshot, result).await);
      }
      Command::Resume {
        bookmark_id,
        payload,
        reply,
      } => {
        let result = inner
          .engine
          .resume(
            &self.workflow,
            &mut self.instance,
            &bookmark_id,
            payload,
            &cancel,
          )
          .await;
        let _ = reply.send(self.commit(snapshot, result).await);
      }
      Command::Cancel { reply } => {
        let result = inner.engine.cancel(&mut self.instance);
        let _ = reply.send(self.commit(snapshot, result).await);
      }
    }
  }

  /// Persist the instance and reconcile worker references.
  ///
  /// When the engine call or the save fails the instance is rolled back to
  /// `snapshot`, so the mailbox keeps matching what the store holds.
  async fn commit(
    &mut self,
    snapshot: WorkflowInstance,
    result: Result<StepReport, EngineError>,
  ) -> Result<StepReport, EngineError> {
    let report = match result {
      Ok(report) => report,
      Err(e) => {
        if self.instance != snapshot {
          warn!(
            instance_id = %self.instance.instance_id,
            error = %e,
            "step failed, instance rolled back"
          );
          self.instance = snapshot;
        }
        return Err(e);
      }
    };

    if let Err(e) = self.inner.store.save(&self.instance).await {
      error!(instance_id = %self.instance.instance_id, error = %e, "failed to persist instance");
      self.instance = snapshot;
      return Err(e.into());
    }

    // Acquire before releasing so a trigger that is re-bookmarked keeps its worker.
    let leases = &self.inner.leases;
    for bookmark in &report.created_bookmarks {
      leases.acquire(&self.inner.workers, bookmark).await;
    }
    for bookmark in &report.removed_bookmarks {
      leases.release(&self.inner.workers, bookmark).await;
    }

    Ok(report)
  }
}
