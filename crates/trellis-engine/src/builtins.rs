use async_trait::async_trait;
use serde_json::{Map, Value};
use trellis_trigger::TriggerIdentity;

use crate::activity::{
  Activity, ActivityContext, ActivityError, ActivityInputs, ActivityOutcome, BookmarkRequest,
};

/// Completes with its `value` input as the `value` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignActivity;

#[async_trait]
impl Activity for AssignActivity {
  async fn execute(
    &self,
    _context: &ActivityContext,
    inputs: &ActivityInputs,
  ) -> Result<ActivityOutcome, ActivityError> {
    let mut outputs = Map::new();
    outputs.insert(
      "value".to_string(),
      inputs.get("value").cloned().unwrap_or(Value::Null),
    );
    Ok(ActivityOutcome::Completed(outputs))
  }
}

/// Waits for a message on `queue` (plus optional `subscription`).
///
/// An optional `correlation` input restricts which messages resume it. Once
/// resumed it completes with the payload as the `message` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveMessageActivity;

#[async_trait]
impl Activity for ReceiveMessageActivity {
  async fn execute(
    &self,
    context: &ActivityContext,
    inputs: &ActivityInputs,
  ) -> Result<ActivityOutcome, ActivityError> {
    if let Some(payload) = &context.resume_payload {
      let mut outputs = Map::new();
      outputs.insert("message".to_string(), payload.clone());
      return Ok(ActivityOutcome::Completed(outputs));
    }

    let queue = required_str(inputs, "queue")?;
    let mut trigger = TriggerIdentity::new(queue);
    match inputs.get("subscription") {
      None | Some(Value::Null) => {}
      Some(Value::String(s)) => trigger = trigger.with_subscription(s.clone()),
      Some(_) => {
        return Err(ActivityError::invalid_input(
          "subscription",
          "expected a string",
        ));
      }
    }

    let mut request = BookmarkRequest::new(trigger);
    if let Some(correlation) = inputs.get("correlation").filter(|v| !v.is_null()) {
      request = request.with_correlation(correlation.clone());
    }
    Ok(ActivityOutcome::Suspend(vec![request]))
  }
}

/// Sets the instance correlation id from its `correlation_id` input.
///
/// Later activities see the new id, and it is persisted with the instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetCorrelationIdActivity;

#[async_trait]
impl Activity for SetCorrelationIdActivity {
  async fn execute(
    &self,
    _context: &ActivityContext,
    inputs: &ActivityInputs,
  ) -> Result<ActivityOutcome, ActivityError> {
    let correlation_id = match inputs.get("correlation_id") {
      Some(Value::Number(n)) => n.to_string(),
      _ => required_str(inputs, "correlation_id")?.to_string(),
    };

    let mut outputs = Map::new();
    outputs.insert(
      "correlation_id".to_string(),
      Value::String(correlation_id.clone()),
    );
    Ok(ActivityOutcome::Correlated {
      correlation_id,
      outputs,
    })
  }
}

/// Always faults with its `message` input.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailActivity;

#[async_trait]
impl Activity for FailActivity {
  async fn execute(
    &self,
    _context: &ActivityContext,
    inputs: &ActivityInputs,
  ) -> Result<ActivityOutcome, ActivityError> {
    let message = inputs
      .get("message")
      .and_then(Value::as_str)
      .unwrap_or("activity failed");
    Err(ActivityError::failed(message))
  }
}

fn required_str<'a>(inputs: &'a ActivityInputs, name: &str) -> Result<&'a str, ActivityError> {
  match inputs.get(name) {
    Some(Value::String(s)) if !s.is_empty() => Ok(s),
    Some(Value::String(_)) | None | Some(Value::Null) => {
      Err(ActivityError::invalid_input(name, "required"))
    }
    Some(_) => Err(ActivityError::invalid_input(name, "expected a string")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tokio_util::sync::CancellationToken;

  fn context(resume: Option<Value>) -> ActivityContext {
    ActivityContext {
      instance_id: "i-1".to_string(),
      activity_id: "a".to_string(),
      correlation_id: None,
      variables: Map::new(),
      resume_payload: resume,
      cancel: CancellationToken::new(),
    }
  }

  fn inputs(value: Value) -> ActivityInputs {
    value.as_object().cloned().unwrap_or_default()
  }

  #[tokio::test]
  async fn test_assign() {
    let outcome = AssignActivity
      .execute(&context(None), &inputs(json!({"value": [1, 2]})))
      .await
      .unwrap();
    match outcome {
      ActivityOutcome::Completed(outputs) => assert_eq!(outputs["value"], json!([1, 2])),
      other => panic!("unexpected outcome: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_receive_message_suspends() {
    let outcome = ReceiveMessageActivity
      .execute(
        &context(None),
        &inputs(json!({"queue": "orders", "subscription": "billing", "correlation": 7})),
      )
      .await
      .unwrap();

    let expected = BookmarkRequest::new(TriggerIdentity::new("orders").with_subscription("billing"))
      .with_correlation(json!(7));
    assert_eq!(outcome, ActivityOutcome::Suspend(vec![expected]));
  }

  #[tokio::test]
  async fn test_receive_message_completes_on_resume() {
    let outcome = ReceiveMessageActivity
      .execute(
        &context(Some(json!({"id": 1}))),
        &inputs(json!({"queue": "orders"})),
      )
      .await
      .unwrap();
    match outcome {
      ActivityOutcome::Completed(outputs) => assert_eq!(outputs["message"], json!({"id": 1})),
      other => panic!("unexpected outcome: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_receive_message_requires_queue() {
    let result = ReceiveMessageActivity
      .execute(&context(None), &inputs(json!({})))
      .await;
    assert!(matches!(result, Err(ActivityError::InvalidInput { .. })));
  }

  #[tokio::test]
  async fn test_set_correlation_id() {
    let outcome = SetCorrelationIdActivity
      .execute(&context(None), &inputs(json!({"correlation_id": "order-7"})))
      .await
      .unwrap();
    match outcome {
      ActivityOutcome::Correlated {
        correlation_id,
        outputs,
      } => {
        assert_eq!(correlation_id, "order-7");
        assert_eq!(outputs["correlation_id"], json!("order-7"));
      }
      other => panic!("unexpected outcome: {other:?}"),
    }

    let numeric = SetCorrelationIdActivity
      .execute(&context(None), &inputs(json!({"correlation_id": 42})))
      .await
      .unwrap();
    assert!(matches!(
      numeric,
      ActivityOutcome::Correlated { correlation_id, .. } if correlation_id == "42"
    ));

    let missing = SetCorrelationIdActivity
      .execute(&context(None), &inputs(json!({"correlation_id": ""})))
      .await;
    assert!(matches!(missing, Err(ActivityError::InvalidInput { .. })));
  }

  #[tokio::test]
  async fn test_fail() {
    let result = FailActivity
      .execute(&context(None), &inputs(json!({"message": "boom"})))
      .await;
    assert_eq!(result.unwrap_err().to_string(), "boom");
  }
}
