use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_trigger::TriggerIdentity;

use crate::pointer::PointerId;

/// A durable suspension point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
  pub bookmark_id: String,
  pub instance_id: String,
  pub pointer_id: PointerId,
  pub activity_id: String,
  pub trigger: TriggerIdentity,
  /// When set, only events carrying an equal correlation resume this bookmark.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correlation: Option<Value>,
}

impl Bookmark {
  /// Whether an event on `trigger` with `correlation` should resume this bookmark.
  pub fn matches(&self, trigger: &TriggerIdentity, correlation: Option<&Value>) -> bool {
    if &self.trigger != trigger {
      return false;
    }
    match &self.correlation {
      Some(expected) => correlation == Some(expected),
      None => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn bookmark(correlation: Option<Value>) -> Bookmark {
    Bookmark {
      bookmark_id: "bm-1".to_string(),
      instance_id: "i-1".to_string(),
      pointer_id: 3,
      activity_id: "wait".to_string(),
      trigger: TriggerIdentity::new("orders").with_subscription("billing"),
      correlation,
    }
  }

  #[test]
  fn test_matches_identity() {
    let b = bookmark(None);
    let orders = TriggerIdentity::new("orders").with_subscription("billing");
    assert!(b.matches(&orders, None));
    assert!(b.matches(&orders, Some(&json!("anything"))));
    assert!(!b.matches(&TriggerIdentity::new("orders"), None));
  }

  #[test]
  fn test_matches_correlation() {
    let b = bookmark(Some(json!({"order": 7})));
    let orders = TriggerIdentity::new("orders").with_subscription("billing");
    assert!(b.matches(&orders, Some(&json!({"order": 7}))));
    assert!(!b.matches(&orders, Some(&json!({"order": 8}))));
    assert!(!b.matches(&orders, None));
  }
}
