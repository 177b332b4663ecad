//! Workflow execution engine.
//!
//! The `Engine` interprets a loaded [`Workflow`] against a
//! [`WorkflowInstance`]. It never owns instances: callers hand one in, the
//! engine mutates it in place and reports which bookmarks appeared or went
//! away so the caller can keep trigger workers in step.
//!
//! One call to [`Engine::advance`] runs until nothing can move without
//! external input. Leaf activities that are ready at the same time execute
//! concurrently; their outcomes are applied one by one in pointer order, so
//! the resulting state is deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use trellis_expression::{EvaluationError, ExpressionContext, ExpressionEvaluator, JinjaEvaluator};
use trellis_state::{
  Bookmark, Fault, FaultKind, INSTANCE_SCOPE, InstanceStatus, PointerId, PointerStatus, ScopeId,
  StateError, WorkflowInstance,
};
use trellis_workflow::{JoinMode, Node, NodeType, Workflow};

use crate::activity::{
  Activity, ActivityContext, ActivityInputs, ActivityOutcome, ActivityOutputs, ActivityRegistry,
  BookmarkRequest,
};
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};

/// What one engine call changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
  pub instance_id: String,
  pub status: InstanceStatus,
  /// Bookmarks created during the call. Each needs a worker reference.
  pub created_bookmarks: Vec<Bookmark>,
  /// Bookmarks consumed or discarded during the call. Each releases one.
  pub removed_bookmarks: Vec<Bookmark>,
}

impl StepReport {
  fn new(instance: &WorkflowInstance) -> Self {
    Self {
      instance_id: instance.instance_id.clone(),
      status: instance.status,
      created_bookmarks: Vec::new(),
      removed_bookmarks: Vec::new(),
    }
  }
}

/// The workflow execution engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification strategies.
/// Use `Engine::new()` for an engine with no-op notifications, or
/// `Engine::with_notifier()` to observe events.
pub struct Engine<N: ExecutionNotifier = NoopNotifier> {
  registry: ActivityRegistry,
  evaluator: Arc<dyn ExpressionEvaluator>,
  notifier: N,
}

impl Engine<NoopNotifier> {
  pub fn new(registry: ActivityRegistry) -> Self {
    Self::with_notifier(registry, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Engine<N> {
  pub fn with_notifier(registry: ActivityRegistry, notifier: N) -> Self {
    Self {
      registry,
      evaluator: Arc::new(JinjaEvaluator::new()),
      notifier,
    }
  }

  /// Replace the default minijinja evaluator.
  pub fn with_evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
    self.evaluator = Arc::new(evaluator);
    self
  }

  pub fn registry(&self) -> &ActivityRegistry {
    &self.registry
  }

  pub fn notifier(&self) -> &N {
    &self.notifier
  }

  /// Check that every leaf names a registered activity type.
  pub fn validate(&self, workflow: &Workflow) -> Result<(), EngineError> {
    for node in workflow.nodes() {
      if let Some(activity_type) = node.activity_type()
        && !self.registry.contains(activity_type)
      {
        return Err(EngineError::UnknownActivityType {
          activity_id: node.node_id.clone(),
          activity_type: activity_type.to_string(),
        });
      }
    }
    Ok(())
  }

  /// Create an instance positioned at the workflow root, without running it.
  ///
  /// `input` is stored as the `input` variable of the instance scope.
  pub fn instantiate(
    &self,
    workflow: &Workflow,
    instance_id: impl Into<String>,
    input: Value,
  ) -> Result<WorkflowInstance, EngineError> {
    let mut instance =
      WorkflowInstance::new(instance_id, &workflow.workflow_id, workflow.version);

    instance.scopes.write(INSTANCE_SCOPE, "input", input)?;
    for name in &workflow.variables {
      instance.scopes.declare(INSTANCE_SCOPE, name)?;
    }
    self.spawn(&mut instance, workflow.root(), None, INSTANCE_SCOPE, false)?;

    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      instance_id: instance.instance_id.clone(),
      workflow_id: workflow.workflow_id.clone(),
    });
    info!(
      instance_id = %instance.instance_id,
      workflow_id = %workflow.workflow_id,
      "workflow_started"
    );
    Ok(instance)
  }

  /// Create an instance with a fresh id and advance it.
  pub async fn start(
    &self,
    workflow: &Workflow,
    input: Value,
    cancel: &CancellationToken,
  ) -> Result<(WorkflowInstance, StepReport), EngineError> {
    let instance_id = uuid::Uuid::new_v4().to_string();
    let mut instance = self.instantiate(workflow, instance_id, input)?;
    let report = self.advance(workflow, &mut instance, cancel).await?;
    Ok((instance, report))
  }

  /// Run the instance until every remaining pointer waits on a bookmark or
  /// the instance reaches a terminal status.
  #[instrument(
    name = "advance",
    skip(self, workflow, instance, cancel),
    fields(instance_id = %instance.instance_id, workflow_id = %workflow.workflow_id)
  )]
  pub async fn advance(
    &self,
    workflow: &Workflow,
    instance: &mut WorkflowInstance,
    cancel: &CancellationToken,
  ) -> Result<StepReport, EngineError> {
    check_definition(workflow, instance)?;
    check_active(instance)?;

    let mut report = StepReport::new(instance);
    instance.status = InstanceStatus::Running;

    loop {
      if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
      }

      self.expand_composites(workflow, instance, &mut report)?;
      if instance.status.is_terminal() {
        break;
      }

      let runnable = runnable_leaves(workflow, instance)?;
      if runnable.is_empty() {
        break;
      }

      let runs = self.prepare(workflow, instance, &runnable, cancel)?;
      let results = tokio::select! {
        results = join_all(runs.iter().map(|run| run.execute())) => results,
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
      };

      for (run, result) in runs.iter().zip(results) {
        self.apply(workflow, instance, run.pointer_id, result, &mut report)?;
        if instance.status.is_terminal() {
          break;
        }
      }
    }

    self.settle(instance, &mut report);
    Ok(report)
  }

  /// Consume a bookmark and continue from the activity that created it.
  ///
  /// Every bookmark held by the same pointer is removed. `payload` is handed
  /// to the activity's next execution, and to its input expressions as
  /// `resume`, then discarded.
  #[instrument(
    name = "resume",
    skip(self, workflow, instance, payload, cancel),
    fields(instance_id = %instance.instance_id)
  )]
  pub async fn resume(
    &self,
    workflow: &Workflow,
    instance: &mut WorkflowInstance,
    bookmark_id: &str,
    payload: Value,
    cancel: &CancellationToken,
  ) -> Result<StepReport, EngineError> {
    check_definition(workflow, instance)?;

    let bookmark = instance
      .bookmark(bookmark_id)
      .cloned()
      .ok_or_else(|| EngineError::BookmarkNotFound(bookmark_id.to_string()))?;

    let removed = instance.take_bookmarks_for(bookmark.pointer_id);
    let pointer = instance.pointer_mut(bookmark.pointer_id)?;
    pointer.status = PointerStatus::Running;
    pointer.resume_payload = Some(payload);
    instance.status = InstanceStatus::Running;

    self.notifier.notify(ExecutionEvent::WorkflowResumed {
      instance_id: instance.instance_id.clone(),
      bookmark_id: bookmark_id.to_string(),
    });
    info!(
      bookmark_id,
      activity_id = %bookmark.activity_id,
      "workflow_resumed"
    );

    let mut report = self.advance(workflow, instance, cancel).await?;
    report.removed_bookmarks.splice(0..0, removed);
    Ok(report)
  }

  /// Cancel every pointer and remove every bookmark.
  #[instrument(name = "cancel", skip(self, instance), fields(instance_id = %instance.instance_id))]
  pub fn cancel(&self, instance: &mut WorkflowInstance) -> Result<StepReport, EngineError> {
    check_active(instance)?;

    let mut report = StepReport::new(instance);
    self.cancel_all(instance, &mut report);
    instance.status = InstanceStatus::Cancelled;
    report.status = instance.status;

    self.notifier.notify(ExecutionEvent::WorkflowCancelled {
      instance_id: instance.instance_id.clone(),
    });
    info!("workflow_cancelled");
    Ok(report)
  }

  /// Add a pointer for `node`. Nodes declaring variables, and every fork
  /// branch, get a scope of their own.
  fn spawn(
    &self,
    instance: &mut WorkflowInstance,
    node: &Node,
    parent: Option<PointerId>,
    parent_scope: ScopeId,
    branch: bool,
  ) -> Result<PointerId, EngineError> {
    let (scope_id, owns_scope) = if branch || !node.variables.is_empty() {
      let scope = instance.scopes.create_scope(parent_scope)?;
      for name in &node.variables {
        instance.scopes.declare(scope, name)?;
      }
      (scope, true)
    } else {
      (parent_scope, false)
    };

    Ok(instance.push_pointer(&node.node_id, parent, scope_id, owns_scope))
  }

  /// Enter every pending sequence and fork, lowest pointer id first.
  fn expand_composites(
    &self,
    workflow: &Workflow,
    instance: &mut WorkflowInstance,
    report: &mut StepReport,
  ) -> Result<(), EngineError> {
    while let Some(pointer_id) = next_pending_composite(workflow, instance)? {
      let (node_id, scope_id) = {
        let pointer = instance.pointer_mut(pointer_id)?;
        pointer.status = PointerStatus::Running;
        (pointer.node_id.clone(), pointer.scope_id)
      };
      let node = workflow.resolve(&node_id)?;
      self.notifier.notify(ExecutionEvent::ActivityStarted {
        instance_id: instance.instance_id.clone(),
        activity_id: node_id.clone(),
      });

      match &node.node_type {
        NodeType::Sequence => match workflow.children_of(&node_id)?.first() {
          Some(first) => {
            let child = workflow.resolve(first)?;
            self.spawn(instance, child, Some(pointer_id), scope_id, false)?;
          }
          None => self.complete(workflow, instance, pointer_id, Map::new(), report)?,
        },
        NodeType::Fork => {
          let branches = workflow.children_of(&node_id)?;
          if branches.is_empty() {
            self.complete(workflow, instance, pointer_id, Map::new(), report)?;
          }
          for branch in branches {
            let child = workflow.resolve(branch)?;
            self.spawn(instance, child, Some(pointer_id), scope_id, true)?;
          }
          debug!(activity_id = %node_id, branches = branches.len(), "fork_entered");
        }
        NodeType::Join { .. } => {
          return Err(EngineError::malformed(format!(
            "join '{}' cannot be entered directly",
            node_id
          )));
        }
        NodeType::Activity { .. } => {}
      }

      if instance.status.is_terminal() {
        break;
      }
    }
    Ok(())
  }

  /// Mark runnable leaves Running and resolve their inputs.
  fn prepare(
    &self,
    workflow: &Workflow,
    instance: &mut WorkflowInstance,
    runnable: &[PointerId],
    cancel: &CancellationToken,
  ) -> Result<Vec<LeafRun>, EngineError> {
    let mut runs = Vec::with_capacity(runnable.len());

    for &pointer_id in runnable {
      let pointer = instance.pointer_mut(pointer_id)?;
      pointer.status = PointerStatus::Running;
      let scope_id = pointer.scope_id;
      let resume = pointer.resume_payload.clone();
      let node = workflow.resolve(&pointer.node_id)?;

      let activity_type = node.activity_type().unwrap_or_default();
      let activity =
        self
          .registry
          .get(activity_type)
          .ok_or_else(|| EngineError::UnknownActivityType {
            activity_id: node.node_id.clone(),
            activity_type: activity_type.to_string(),
          })?;

      let variables = instance.scopes.flatten(scope_id);
      let expressions = ExpressionContext::new(&instance.instance_id, &node.node_id)
        .with_variables(variables.clone())
        .with_correlation_id(instance.correlation_id.clone())
        .with_resume(resume.clone());
      let inputs = self.resolve_inputs(node, &expressions);

      self.notifier.notify(ExecutionEvent::ActivityStarted {
        instance_id: instance.instance_id.clone(),
        activity_id: node.node_id.clone(),
      });

      runs.push(LeafRun {
        pointer_id,
        activity_id: node.node_id.clone(),
        activity,
        inputs,
        context: ActivityContext {
          instance_id: instance.instance_id.clone(),
          activity_id: node.node_id.clone(),
          correlation_id: instance.correlation_id.clone(),
          variables,
          resume_payload: resume,
          cancel: cancel.child_token(),
        },
      });
    }

    Ok(runs)
  }

  /// Evaluate input expressions in name order. The first failure wins.
  fn resolve_inputs(
    &self,
    node: &Node,
    context: &ExpressionContext,
  ) -> Result<ActivityInputs, EvaluationError> {
    let ordered: BTreeMap<_, _> = node.inputs.iter().collect();
    let mut inputs = Map::new();
    for (name, expression) in ordered {
      let value = self.evaluator.evaluate(expression, context)?;
      inputs.insert(name.clone(), value);
    }
    Ok(inputs)
  }

  /// Apply one leaf's outcome. Outcomes for pointers cancelled earlier in
  /// the same round are dropped.
  fn apply(
    &self,
    workflow: &Workflow,
    instance: &mut WorkflowInstance,
    pointer_id: PointerId,
    result: LeafResult,
    report: &mut StepReport,
  ) -> Result<(), EngineError> {
    let (node_id, scope_id) = match instance.pointer(pointer_id) {
      Some(p) if p.status == PointerStatus::Running => (p.node_id.clone(), p.scope_id),
      _ => {
        debug!(pointer_id, "discarding outcome of cancelled pointer");
        return Ok(());
      }
    };
    let node = workflow.resolve(&node_id)?;

    match result {
      LeafResult::Completed {
        outputs,
        correlation_id,
      } => {
        if let Some(correlation_id) = correlation_id {
          info!(%correlation_id, activity_id = %node_id, "correlation_id_set");
          instance.correlation_id = Some(correlation_id);
        }
        for (output, variable) in &node.outputs {
          let value = outputs.get(output).cloned().unwrap_or(Value::Null);
          instance.scopes.write(scope_id, variable, value)?;
        }
        instance.pointer_mut(pointer_id)?.resume_payload = None;
        self.complete(workflow, instance, pointer_id, outputs, report)
      }
      LeafResult::Suspended(requests) => {
        if let Some(reason) = invalid_suspension(&requests) {
          let fault = Fault::new(&node_id, FaultKind::Activity, reason);
          return self.fault(workflow, instance, pointer_id, fault, report);
        }

        let pointer = instance.pointer_mut(pointer_id)?;
        pointer.status = PointerStatus::Suspended;
        pointer.resume_payload = None;

        let mut bookmark_ids = Vec::with_capacity(requests.len());
        for request in requests {
          let bookmark =
            instance.add_bookmark(pointer_id, &node_id, request.trigger, request.correlation);
          bookmark_ids.push(bookmark.bookmark_id.clone());
          report.created_bookmarks.push(bookmark);
        }

        info!(activity_id = %node_id, bookmarks = ?bookmark_ids, "activity_suspended");
        self.notifier.notify(ExecutionEvent::ActivitySuspended {
          instance_id: instance.instance_id.clone(),
          activity_id: node_id,
          bookmarks: bookmark_ids,
        });
        Ok(())
      }
      LeafResult::Faulted(fault) => self.fault(workflow, instance, pointer_id, fault, report),
    }
  }

  /// Mark a pointer Completed and let its parent react.
  fn complete(
    &self,
    workflow: &Workflow,
    instance: &mut WorkflowInstance,
    pointer_id: PointerId,
    outputs: ActivityOutputs,
    report: &mut StepReport,
  ) -> Result<(), EngineError> {
    let pointer = instance.pointer_mut(pointer_id)?;
    pointer.status = PointerStatus::Completed;
    let node_id = pointer.node_id.clone();
    let parent = pointer.parent;

    debug!(activity_id = %node_id, "activity_completed");
    self.notifier.notify(ExecutionEvent::ActivityCompleted {
      instance_id: instance.instance_id.clone(),
      activity_id: node_id.clone(),
      outputs: Value::Object(outputs),
    });

    let Some(parent_id) = parent else {
      instance.remove_pointer(pointer_id);
      report.removed_bookmarks.extend(instance.clear_bookmarks());
      instance.status = InstanceStatus::Completed;
      self.notifier.notify(ExecutionEvent::WorkflowCompleted {
        instance_id: instance.instance_id.clone(),
      });
      info!(instance_id = %instance.instance_id, "workflow_completed");
      return Ok(());
    };

    let parent_node = resolve_parent(workflow, instance, parent_id)?;
    match parent_node.node_type {
      NodeType::Sequence => {
        instance.remove_pointer(pointer_id);

        // A completed fork has already been joined, so skip its join.
        let step = if workflow.resolve(&node_id)?.node_type == NodeType::Fork {
          2
        } else {
          1
        };
        let parent = instance.pointer_mut(parent_id)?;
        let next = parent.child_index + step;
        let scope_id = parent.scope_id;

        match workflow.children_of(&parent_node.node_id)?.get(next) {
          Some(next_id) => {
            instance.pointer_mut(parent_id)?.child_index = next;
            let child = workflow.resolve(next_id)?;
            self.spawn(instance, child, Some(parent_id), scope_id, false)?;
            Ok(())
          }
          None => self.complete(workflow, instance, parent_id, Map::new(), report),
        }
      }
      NodeType::Fork => match join_mode(workflow, &parent_node.node_id)? {
        JoinMode::WaitAll => {
          let all_done = instance.children_of(parent_id).iter().all(|id| {
            instance
              .pointer(*id)
              .is_some_and(|p| p.status == PointerStatus::Completed)
          });
          if !all_done {
            return Ok(());
          }
          self.merge_branches(instance, parent_id, report);
          self.complete(workflow, instance, parent_id, Map::new(), report)
        }
        JoinMode::WaitAny => {
          self.merge_branches(instance, parent_id, report);
          self.complete(workflow, instance, parent_id, Map::new(), report)
        }
      },
      _ => Err(EngineError::malformed(format!(
        "'{}' cannot contain '{}'",
        parent_node.node_id, node_id
      ))),
    }
  }

  /// Mark a pointer Faulted and propagate according to its parent.
  fn fault(
    &self,
    workflow: &Workflow,
    instance: &mut WorkflowInstance,
    pointer_id: PointerId,
    fault: Fault,
    report: &mut StepReport,
  ) -> Result<(), EngineError> {
    let pointer = instance.pointer_mut(pointer_id)?;
    pointer.status = PointerStatus::Faulted;
    pointer.fault = Some(fault.clone());
    pointer.resume_payload = None;
    let node_id = pointer.node_id.clone();
    let parent = pointer.parent;

    warn!(activity_id = %node_id, error = %fault.message, "activity_faulted");
    self.notifier.notify(ExecutionEvent::ActivityFaulted {
      instance_id: instance.instance_id.clone(),
      activity_id: node_id.clone(),
      error: fault.message.clone(),
    });

    let Some(parent_id) = parent else {
      self.fault_instance(instance, fault, report);
      return Ok(());
    };

    let parent_node = resolve_parent(workflow, instance, parent_id)?;
    match parent_node.node_type {
      NodeType::Sequence => {
        self.cancel_subtree(instance, pointer_id, report);
        self.fault(workflow, instance, parent_id, fault, report)
      }
      NodeType::Fork => match join_mode(workflow, &parent_node.node_id)? {
        JoinMode::WaitAll => {
          self.merge_branches(instance, parent_id, report);
          self.fault(workflow, instance, parent_id, fault, report)
        }
        JoinMode::WaitAny => {
          let branches = instance.children_of(parent_id);
          let faults: Vec<String> = branches
            .iter()
            .filter_map(|id| instance.pointer(*id))
            .filter(|p| p.status == PointerStatus::Faulted)
            .filter_map(|p| p.fault.as_ref().map(ToString::to_string))
            .collect();
          if faults.len() < branches.len() {
            debug!(activity_id = %node_id, "branch fault absorbed by wait_any join");
            return Ok(());
          }

          self.merge_branches(instance, parent_id, report);
          let fault = Fault::new(
            &parent_node.node_id,
            FaultKind::Branch,
            format!("all branches faulted: {}", faults.join("; ")),
          );
          self.fault(workflow, instance, parent_id, fault, report)
        }
      },
      _ => Err(EngineError::malformed(format!(
        "'{}' cannot contain '{}'",
        parent_node.node_id, node_id
      ))),
    }
  }

  fn fault_instance(&self, instance: &mut WorkflowInstance, fault: Fault, report: &mut StepReport) {
    self.cancel_all(instance, report);
    instance.status = InstanceStatus::Faulted;

    error!(
      instance_id = %instance.instance_id,
      activity_id = %fault.activity_id,
      error = %fault.message,
      "workflow_faulted"
    );
    self.notifier.notify(ExecutionEvent::WorkflowFaulted {
      instance_id: instance.instance_id.clone(),
      error: fault.to_string(),
    });
    instance.fault = Some(fault);
  }

  /// Discard every branch of a fork, cancelling those still active.
  fn merge_branches(&self, instance: &mut WorkflowInstance, fork_id: PointerId, report: &mut StepReport) {
    for branch in instance.children_of(fork_id) {
      self.cancel_subtree(instance, branch, report);
    }
  }

  /// Cancel a pointer and everything below it, then remove them.
  fn cancel_subtree(
    &self,
    instance: &mut WorkflowInstance,
    pointer_id: PointerId,
    report: &mut StepReport,
  ) {
    let mut ids = vec![pointer_id];
    ids.extend(instance.descendants_of(pointer_id));
    self.cancel_pointers(instance, &ids, report);
  }

  fn cancel_all(&self, instance: &mut WorkflowInstance, report: &mut StepReport) {
    let ids: Vec<PointerId> = instance.pointers.keys().copied().collect();
    self.cancel_pointers(instance, &ids, report);
    report.removed_bookmarks.extend(instance.clear_bookmarks());
  }

  fn cancel_pointers(
    &self,
    instance: &mut WorkflowInstance,
    ids: &[PointerId],
    report: &mut StepReport,
  ) {
    for &id in ids {
      report.removed_bookmarks.extend(instance.take_bookmarks_for(id));
      if let Some(pointer) = instance.pointers.get_mut(&id)
        && !pointer.status.is_terminal()
      {
        pointer.status = PointerStatus::Cancelled;
        let activity_id = pointer.node_id.clone();
        debug!(activity_id = %activity_id, "activity_cancelled");
        self.notifier.notify(ExecutionEvent::ActivityCancelled {
          instance_id: instance.instance_id.clone(),
          activity_id,
        });
      }
    }
    for &id in ids.iter().rev() {
      instance.remove_pointer(id);
    }
  }

  fn settle(&self, instance: &mut WorkflowInstance, report: &mut StepReport) {
    if !instance.status.is_terminal() {
      let suspended = instance
        .pointers
        .values()
        .any(|p| p.status == PointerStatus::Suspended);
      if suspended {
        instance.status = InstanceStatus::Suspended;
        info!(
          instance_id = %instance.instance_id,
          bookmarks = instance.bookmarks.len(),
          "workflow_suspended"
        );
        self.notifier.notify(ExecutionEvent::WorkflowSuspended {
          instance_id: instance.instance_id.clone(),
        });
      } else {
        warn!(instance_id = %instance.instance_id, "instance stalled without bookmarks");
      }
    }
    report.status = instance.status;
  }
}

/// A leaf activity ready to execute.
struct LeafRun {
  pointer_id: PointerId,
  activity_id: String,
  activity: Arc<dyn Activity>,
  inputs: Result<ActivityInputs, EvaluationError>,
  context: ActivityContext,
}

enum LeafResult {
  Completed {
    outputs: ActivityOutputs,
    correlation_id: Option<String>,
  },
  Suspended(Vec<BookmarkRequest>),
  Faulted(Fault),
}

impl LeafRun {
  async fn execute(&self) -> LeafResult {
    let inputs = match &self.inputs {
      Ok(inputs) => inputs,
      Err(e) => {
        return LeafResult::Faulted(Fault::new(
          &self.activity_id,
          FaultKind::Evaluation,
          e.to_string(),
        ));
      }
    };

    match self.activity.execute(&self.context, inputs).await {
      Ok(ActivityOutcome::Completed(outputs)) => LeafResult::Completed {
        outputs,
        correlation_id: None,
      },
      Ok(ActivityOutcome::Correlated {
        correlation_id,
        outputs,
      }) => LeafResult::Completed {
        outputs,
        correlation_id: Some(correlation_id),
      },
      Ok(ActivityOutcome::Suspend(requests)) => LeafResult::Suspended(requests),
      Err(e) => LeafResult::Faulted(Fault::new(
        &self.activity_id,
        FaultKind::Activity,
        e.to_string(),
      )),
    }
  }
}

fn check_definition(workflow: &Workflow, instance: &WorkflowInstance) -> Result<(), EngineError> {
  if instance.workflow_id != workflow.workflow_id || instance.workflow_version != workflow.version {
    return Err(EngineError::DefinitionMismatch {
      instance_id: instance.instance_id.clone(),
      expected: format!("{}@{}", instance.workflow_id, instance.workflow_version),
      actual: format!("{}@{}", workflow.workflow_id, workflow.version),
    });
  }
  Ok(())
}

fn check_active(instance: &WorkflowInstance) -> Result<(), EngineError> {
  if instance.status.is_terminal() {
    return Err(EngineError::InstanceTerminal {
      instance_id: instance.instance_id.clone(),
      status: instance.status,
    });
  }
  Ok(())
}

fn next_pending_composite(
  workflow: &Workflow,
  instance: &WorkflowInstance,
) -> Result<Option<PointerId>, EngineError> {
  for pointer in instance.pointers.values() {
    if pointer.status == PointerStatus::Pending && !workflow.resolve(&pointer.node_id)?.is_leaf() {
      return Ok(Some(pointer.id));
    }
  }
  Ok(None)
}

/// Leaves that are pending, or running after a resume.
fn runnable_leaves(
  workflow: &Workflow,
  instance: &WorkflowInstance,
) -> Result<Vec<PointerId>, EngineError> {
  let mut runnable = Vec::new();
  for pointer in instance.pointers.values() {
    if matches!(
      pointer.status,
      PointerStatus::Pending | PointerStatus::Running
    ) && workflow.resolve(&pointer.node_id)?.is_leaf()
    {
      runnable.push(pointer.id);
    }
  }
  Ok(runnable)
}

fn resolve_parent<'w>(
  workflow: &'w Workflow,
  instance: &WorkflowInstance,
  parent_id: PointerId,
) -> Result<&'w Node, EngineError> {
  let parent = instance
    .pointer(parent_id)
    .ok_or(StateError::PointerNotFound(parent_id))?;
  Ok(workflow.resolve(&parent.node_id)?)
}

fn join_mode(workflow: &Workflow, fork_id: &str) -> Result<JoinMode, EngineError> {
  match workflow.join_target_of(fork_id)?.node_type {
    NodeType::Join { mode } => Ok(mode),
    _ => Err(EngineError::malformed(format!(
      "fork '{}' is not closed by a join",
      fork_id
    ))),
  }
}

fn invalid_suspension(requests: &[BookmarkRequest]) -> Option<String> {
  if requests.is_empty() {
    return Some("activity suspended without a trigger".to_string());
  }
  requests
    .iter()
    .find_map(|r| r.trigger.validate().err())
    .map(|e| e.to_string())
}
