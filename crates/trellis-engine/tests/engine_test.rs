//! Interpreter behaviour: sequences, fork/join policies, scoping, faults and
//! persistence of suspended instances.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use trellis_config::{ActivityDef, JoinMode, WorkflowDef};
use trellis_engine::{
  Activity, ActivityContext, ActivityError, ActivityInputs, ActivityOutcome, ActivityRegistry,
  BookmarkRequest, ChannelNotifier, Engine, EngineError, ExecutionEvent, FsInstanceStore,
  InstanceStore,
};
use trellis_state::{FaultKind, INSTANCE_SCOPE, InstanceStatus, WorkflowInstance};
use trellis_trigger::TriggerIdentity;
use trellis_workflow::Workflow;

fn engine() -> Engine {
  Engine::new(ActivityRegistry::with_builtins())
}

fn load(root: ActivityDef, variables: &[&str]) -> Workflow {
  let mut def = WorkflowDef::new("test", "Test", root);
  def.variables = variables.iter().map(|v| v.to_string()).collect();
  Workflow::load(def).unwrap()
}

fn receive(id: &str, queue: &str) -> ActivityDef {
  ActivityDef::leaf(id, "receive_message").with_input("queue", queue)
}

fn assign(id: &str, value: &str, variable: &str) -> ActivityDef {
  ActivityDef::leaf(id, "assign")
    .with_input("value", value)
    .with_output("value", variable)
}

fn fail(id: &str, message: &str) -> ActivityDef {
  ActivityDef::leaf(id, "fail").with_input("message", message)
}

fn bookmark_on(instance: &WorkflowInstance, source: &str) -> String {
  instance
    .bookmarks
    .iter()
    .find(|b| b.trigger.source == source)
    .map(|b| b.bookmark_id.clone())
    .unwrap_or_else(|| panic!("no bookmark on {source}"))
}

fn variable(instance: &WorkflowInstance, name: &str) -> Option<Value> {
  instance.scopes.read(INSTANCE_SCOPE, name).cloned()
}

async fn started(engine: &Engine, workflow: &Workflow) -> WorkflowInstance {
  let mut instance = engine.instantiate(workflow, "i-1", json!({})).unwrap();
  engine
    .advance(workflow, &mut instance, &CancellationToken::new())
    .await
    .unwrap();
  instance
}

fn wait_all_workflow() -> Workflow {
  load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::fork(
          "fork",
          vec![
            receive("w1", "Q1"),
            receive("w2", "Q2"),
            receive("w3", "Q3"),
          ],
        ),
        ActivityDef::join("join", JoinMode::WaitAll),
        assign("after", "done", "status"),
      ],
    ),
    &["status"],
  )
}

#[tokio::test]
async fn test_suspend_then_resume_to_completion() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        receive("a", "T").with_output("message", "received"),
        assign("b", "{{ received.id }}", "result"),
      ],
    ),
    &["received", "result"],
  );
  let cancel = CancellationToken::new();

  let mut instance = engine.instantiate(&workflow, "i-1", json!({})).unwrap();
  let report = engine
    .advance(&workflow, &mut instance, &cancel)
    .await
    .unwrap();

  assert_eq!(report.status, InstanceStatus::Suspended);
  assert_eq!(instance.status, InstanceStatus::Suspended);
  assert_eq!(report.created_bookmarks.len(), 1);
  assert_eq!(report.created_bookmarks[0].trigger, TriggerIdentity::new("T"));
  assert_eq!(instance.bookmarks.len(), 1);
  instance.verify().unwrap();

  let bookmark_id = report.created_bookmarks[0].bookmark_id.clone();
  let report = engine
    .resume(&workflow, &mut instance, &bookmark_id, json!({"id": 42}), &cancel)
    .await
    .unwrap();

  assert_eq!(report.status, InstanceStatus::Completed);
  assert_eq!(report.removed_bookmarks.len(), 1);
  assert!(instance.bookmarks.is_empty());
  assert!(instance.pointers.is_empty());
  assert_eq!(variable(&instance, "result"), Some(json!(42)));
}

#[tokio::test]
async fn test_wait_all_fires_after_every_branch() {
  let engine = engine();
  let workflow = wait_all_workflow();
  let cancel = CancellationToken::new();
  let mut instance = started(&engine, &workflow).await;
  assert_eq!(instance.bookmarks.len(), 3);

  for (queue, expected) in [
    ("Q1", InstanceStatus::Suspended),
    ("Q2", InstanceStatus::Suspended),
    ("Q3", InstanceStatus::Completed),
  ] {
    let bookmark_id = bookmark_on(&instance, queue);
    let report = engine
      .resume(&workflow, &mut instance, &bookmark_id, json!(queue), &cancel)
      .await
      .unwrap();
    assert_eq!(report.status, expected, "after resuming {queue}");
    instance.verify().unwrap();
  }

  assert_eq!(variable(&instance, "status"), Some(json!("done")));
}

#[tokio::test]
async fn test_wait_all_fault_cancels_siblings() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::fork(
          "fork",
          vec![
            receive("w1", "Q1"),
            ActivityDef::sequence("b2", vec![receive("w2", "Q2"), fail("explode", "boom")]),
            receive("w3", "Q3"),
          ],
        ),
        ActivityDef::join("join", JoinMode::WaitAll),
      ],
    ),
    &[],
  );
  let mut instance = started(&engine, &workflow).await;
  assert_eq!(instance.bookmarks.len(), 3);

  let bookmark_id = bookmark_on(&instance, "Q2");
  let report = engine
    .resume(
      &workflow,
      &mut instance,
      &bookmark_id,
      json!({}),
      &CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(report.status, InstanceStatus::Faulted);
  let removed: BTreeSet<_> = report
    .removed_bookmarks
    .iter()
    .map(|b| b.trigger.source.as_str())
    .collect();
  assert_eq!(removed, BTreeSet::from(["Q1", "Q2", "Q3"]));
  assert!(instance.bookmarks.is_empty());
  assert!(instance.pointers.is_empty());

  let fault = instance.fault.as_ref().unwrap();
  assert_eq!(fault.activity_id, "explode");
  assert_eq!(fault.kind, FaultKind::Activity);
  assert_eq!(fault.message, "boom");
}

#[tokio::test]
async fn test_wait_any_cancels_the_loser() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::fork("race", vec![receive("fast", "A"), receive("slow", "B")]),
        ActivityDef::join("first", JoinMode::WaitAny),
        receive("final", "C"),
      ],
    ),
    &[],
  );
  let cancel = CancellationToken::new();
  let mut instance = started(&engine, &workflow).await;

  let fast = bookmark_on(&instance, "A");
  let slow = bookmark_on(&instance, "B");
  let report = engine
    .resume(&workflow, &mut instance, &fast, json!(1), &cancel)
    .await
    .unwrap();

  assert_eq!(report.status, InstanceStatus::Suspended);
  let removed: Vec<_> = report
    .removed_bookmarks
    .iter()
    .map(|b| b.bookmark_id.clone())
    .collect();
  assert_eq!(removed, vec![fast, slow.clone()]);
  assert_eq!(report.created_bookmarks.len(), 1);
  assert_eq!(report.created_bookmarks[0].trigger.source, "C");
  instance.verify().unwrap();

  let late = engine
    .resume(&workflow, &mut instance, &slow, json!(2), &cancel)
    .await;
  assert!(matches!(late, Err(EngineError::BookmarkNotFound(id)) if id == slow));
  assert_eq!(instance.status, InstanceStatus::Suspended);
}

#[tokio::test]
async fn test_wait_any_cancels_nested_forks() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let engine = Engine::with_notifier(ActivityRegistry::with_builtins(), notifier);
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::fork(
          "race",
          vec![
            receive("fast", "A"),
            ActivityDef::sequence(
              "slow",
              vec![
                ActivityDef::fork("inner", vec![receive("x", "X"), receive("y", "Y")]),
                ActivityDef::join("inner_join", JoinMode::WaitAll),
              ],
            ),
          ],
        ),
        ActivityDef::join("first", JoinMode::WaitAny),
      ],
    ),
    &[],
  );
  let cancel = CancellationToken::new();
  let mut instance = engine.instantiate(&workflow, "i-1", json!({})).unwrap();
  engine
    .advance(&workflow, &mut instance, &cancel)
    .await
    .unwrap();
  assert_eq!(instance.bookmarks.len(), 3);

  let fast = bookmark_on(&instance, "A");
  let report = engine
    .resume(&workflow, &mut instance, &fast, json!(null), &cancel)
    .await
    .unwrap();

  assert_eq!(report.status, InstanceStatus::Completed);
  assert_eq!(report.removed_bookmarks.len(), 3);
  assert!(instance.pointers.is_empty());

  let mut cancelled = BTreeSet::new();
  while let Ok(event) = events.try_recv() {
    if let ExecutionEvent::ActivityCancelled { activity_id, .. } = event {
      cancelled.insert(activity_id);
    }
  }
  let expected: BTreeSet<String> = ["slow", "inner", "x", "y"]
    .into_iter()
    .map(String::from)
    .collect();
  assert_eq!(cancelled, expected);
}

#[tokio::test]
async fn test_wait_any_absorbs_single_fault() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::fork("race", vec![fail("bad", "nope"), receive("ok", "A")]),
        ActivityDef::join("first", JoinMode::WaitAny),
      ],
    ),
    &[],
  );
  let mut instance = started(&engine, &workflow).await;
  assert_eq!(instance.status, InstanceStatus::Suspended);
  assert!(instance.fault.is_none());

  let bookmark_id = bookmark_on(&instance, "A");
  let report = engine
    .resume(
      &workflow,
      &mut instance,
      &bookmark_id,
      json!({}),
      &CancellationToken::new(),
    )
    .await
    .unwrap();
  assert_eq!(report.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn test_wait_any_propagates_when_every_branch_faults() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::fork("race", vec![fail("bad1", "one"), fail("bad2", "two")]),
        ActivityDef::join("first", JoinMode::WaitAny),
      ],
    ),
    &[],
  );
  let instance = started(&engine, &workflow).await;

  assert_eq!(instance.status, InstanceStatus::Faulted);
  let fault = instance.fault.as_ref().unwrap();
  assert_eq!(fault.activity_id, "race");
  assert_eq!(fault.kind, FaultKind::Branch);
  assert!(fault.message.contains("one"));
  assert!(fault.message.contains("two"));
}

#[tokio::test]
async fn test_evaluation_error_faults_instance() {
  let engine = engine();
  let workflow = load(assign("calc", "{{ 1 + }}", "x"), &[]);
  let instance = started(&engine, &workflow).await;

  assert_eq!(instance.status, InstanceStatus::Faulted);
  assert_eq!(instance.fault.as_ref().unwrap().kind, FaultKind::Evaluation);
}

#[tokio::test]
async fn test_invalid_trigger_faults_activity() {
  let engine = engine();
  let workflow = load(
    receive("wait", "orders").with_input("subscription", ""),
    &[],
  );
  let instance = started(&engine, &workflow).await;

  assert_eq!(instance.status, InstanceStatus::Faulted);
  assert!(instance.bookmarks.is_empty());
}

#[tokio::test]
async fn test_declared_variable_outlives_inner_sequence() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "outer",
      vec![
        ActivityDef::sequence("inner", vec![assign("set", "{{ 5 }}", "total")])
          .with_variable("scratch"),
        assign("copy", "{{ total }}", "result"),
      ],
    )
    .with_variable("total"),
    &["result"],
  );
  let instance = started(&engine, &workflow).await;

  assert_eq!(instance.status, InstanceStatus::Completed);
  assert_eq!(variable(&instance, "result"), Some(json!(5)));
  // Only the instance scope survives completion.
  assert_eq!(instance.scopes.len(), 1);
  assert_eq!(variable(&instance, "total"), None);
}

#[tokio::test]
async fn test_undeclared_variable_stays_in_branch() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::fork(
          "split",
          vec![
            ActivityDef::sequence(
              "left",
              vec![
                assign("note_set", "hi", "note"),
                assign("note_copy", "{{ note }}", "copied"),
              ],
            ),
            assign("peek", "{{ note }}", "peeked"),
          ],
        ),
        ActivityDef::join("merge", JoinMode::WaitAll),
        assign("after", "{{ note }}", "seen"),
      ],
    ),
    &["copied", "peeked", "seen"],
  );
  let instance = started(&engine, &workflow).await;

  assert_eq!(instance.status, InstanceStatus::Completed);
  assert_eq!(variable(&instance, "copied"), Some(json!("hi")));
  assert_eq!(variable(&instance, "peeked"), Some(Value::Null));
  assert_eq!(variable(&instance, "seen"), Some(Value::Null));
  assert_eq!(variable(&instance, "note"), None);
}

struct Approval;

#[async_trait]
impl Activity for Approval {
  async fn execute(
    &self,
    context: &ActivityContext,
    inputs: &ActivityInputs,
  ) -> Result<ActivityOutcome, ActivityError> {
    match &context.resume_payload {
      None => Ok(ActivityOutcome::Suspend(vec![BookmarkRequest::new(
        TriggerIdentity::new("approvals"),
      )])),
      Some(_) => Ok(ActivityOutcome::Completed(inputs.clone())),
    }
  }
}

#[tokio::test]
async fn test_resume_payload_reaches_inputs_once() {
  let mut registry = ActivityRegistry::with_builtins();
  registry.register("approval", Approval);
  let engine = Engine::new(registry);
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::leaf("approve", "approval")
          .with_input("decision", "{{ resume.approved }}")
          .with_output("decision", "approved"),
        assign("later", "{{ resume }}", "leftover"),
      ],
    ),
    &["approved", "leftover"],
  );
  let cancel = CancellationToken::new();
  let mut instance = engine.instantiate(&workflow, "i-1", json!({})).unwrap();
  engine
    .advance(&workflow, &mut instance, &cancel)
    .await
    .unwrap();

  let bookmark_id = bookmark_on(&instance, "approvals");
  engine
    .resume(
      &workflow,
      &mut instance,
      &bookmark_id,
      json!({"approved": true}),
      &cancel,
    )
    .await
    .unwrap();

  assert_eq!(instance.status, InstanceStatus::Completed);
  assert_eq!(variable(&instance, "approved"), Some(json!(true)));
  assert_eq!(variable(&instance, "leftover"), Some(Value::Null));
}

#[tokio::test]
async fn test_cancel_removes_bookmarks() {
  let engine = engine();
  let workflow = wait_all_workflow();
  let mut instance = started(&engine, &workflow).await;
  let bookmark_id = bookmark_on(&instance, "Q1");

  let report = engine.cancel(&mut instance).unwrap();
  assert_eq!(report.status, InstanceStatus::Cancelled);
  assert_eq!(report.removed_bookmarks.len(), 3);
  assert!(instance.pointers.is_empty());
  assert!(instance.bookmarks.is_empty());

  assert!(matches!(
    engine.cancel(&mut instance),
    Err(EngineError::InstanceTerminal { .. })
  ));
  let cancel = CancellationToken::new();
  assert!(matches!(
    engine.advance(&workflow, &mut instance, &cancel).await,
    Err(EngineError::InstanceTerminal { .. })
  ));
  assert!(matches!(
    engine
      .resume(&workflow, &mut instance, &bookmark_id, json!(1), &cancel)
      .await,
    Err(EngineError::BookmarkNotFound(_))
  ));
}

#[tokio::test]
async fn test_cancelled_token_stops_advance() {
  let engine = engine();
  let workflow = wait_all_workflow();
  let mut instance = engine.instantiate(&workflow, "i-1", json!({})).unwrap();
  let cancel = CancellationToken::new();
  cancel.cancel();

  let result = engine.advance(&workflow, &mut instance, &cancel).await;
  assert!(matches!(result, Err(EngineError::Cancelled)));
  assert!(!instance.status.is_terminal());
}

#[tokio::test]
async fn test_definition_mismatch() {
  let engine = engine();
  let workflow = wait_all_workflow();
  let mut instance = started(&engine, &workflow).await;

  let mut other = WorkflowDef::new("other", "Other", receive("w", "Q"));
  other.version = 2;
  let other = Workflow::load(other).unwrap();

  let result = engine
    .advance(&other, &mut instance, &CancellationToken::new())
    .await;
  assert!(matches!(result, Err(EngineError::DefinitionMismatch { .. })));
}

#[test]
fn test_validate_rejects_unknown_activity_types() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence("main", vec![ActivityDef::leaf("x", "teleport")]),
    &[],
  );

  let result = engine.validate(&workflow);
  assert!(matches!(
    result,
    Err(EngineError::UnknownActivityType { activity_id, activity_type })
      if activity_id == "x" && activity_type == "teleport"
  ));
  assert!(engine.validate(&wait_all_workflow()).is_ok());
}

#[tokio::test]
async fn test_advance_is_deterministic() {
  let engine = engine();
  let workflow = wait_all_workflow();

  let a = started(&engine, &workflow).await;
  let b = started(&engine, &workflow).await;

  assert_eq!(a, b);
  let ids: Vec<_> = a.bookmarks.iter().map(|b| b.bookmark_id.as_str()).collect();
  assert_eq!(ids, vec!["bm-1", "bm-2", "bm-3"]);
}

#[tokio::test]
async fn test_persisted_instance_resumes_identically() {
  let engine = engine();
  let workflow = wait_all_workflow();
  let cancel = CancellationToken::new();
  let dir = tempfile::TempDir::new().unwrap();
  let store = FsInstanceStore::new(dir.path());

  let mut live = started(&engine, &workflow).await;
  store.save(&live).await.unwrap();
  let mut reloaded = store.load(&live.instance_id).await.unwrap();
  assert_eq!(reloaded, live);

  for queue in ["Q2", "Q1", "Q3"] {
    let bookmark_id = bookmark_on(&live, queue);
    let payload = json!({ "queue": queue });
    let a = engine
      .resume(&workflow, &mut live, &bookmark_id, payload.clone(), &cancel)
      .await
      .unwrap();
    let b = engine
      .resume(&workflow, &mut reloaded, &bookmark_id, payload, &cancel)
      .await
      .unwrap();
    assert_eq!(a, b);

    // Persist between every step on the reloaded side.
    store.save(&reloaded).await.unwrap();
    reloaded = store.load(&reloaded.instance_id).await.unwrap();
  }

  assert_eq!(live.status, InstanceStatus::Completed);
  assert_eq!(live, reloaded);
}

#[tokio::test]
async fn test_activity_sets_correlation_id_for_later_steps() {
  let engine = engine();
  let workflow = load(
    ActivityDef::sequence(
      "main",
      vec![
        ActivityDef::leaf("correlate", "set_correlation_id")
          .with_input("correlation_id", "order-{{ input.id }}"),
        receive("wait", "Q1"),
        assign("seen", "{{ correlation_id() }}", "seen"),
      ],
    ),
    &["seen"],
  );
  let cancel = CancellationToken::new();
  let dir = tempfile::TempDir::new().unwrap();
  let store = FsInstanceStore::new(dir.path());

  let mut instance = engine.instantiate(&workflow, "i-1", json!({ "id": 7 })).unwrap();
  assert_eq!(instance.correlation_id, None);
  engine.advance(&workflow, &mut instance, &cancel).await.unwrap();
  assert_eq!(instance.status, InstanceStatus::Suspended);
  assert_eq!(instance.correlation_id.as_deref(), Some("order-7"));

  store.save(&instance).await.unwrap();
  let mut reloaded = store.load("i-1").await.unwrap();
  assert_eq!(reloaded.correlation_id.as_deref(), Some("order-7"));

  let bookmark_id = bookmark_on(&reloaded, "Q1");
  engine
    .resume(&workflow, &mut reloaded, &bookmark_id, json!({}), &cancel)
    .await
    .unwrap();
  assert_eq!(reloaded.status, InstanceStatus::Completed);
  assert_eq!(variable(&reloaded, "seen"), Some(json!("order-7")));
}
