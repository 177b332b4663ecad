use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TriggerError;

/// Identifies an external event source, e.g. a queue, or a topic plus subscription.
///
/// The engine treats it as an opaque key. Bookmarks are keyed by it and
/// exactly one worker listens on it per process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerIdentity {
  /// Queue or topic name.
  pub source: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subscription: Option<String>,
}

impl TriggerIdentity {
  pub fn new(source: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      subscription: None,
    }
  }

  pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
    self.subscription = Some(subscription.into());
    self
  }

  /// Reject identities no transport could listen on.
  pub fn validate(&self) -> Result<(), TriggerError> {
    if self.source.trim().is_empty() {
      return Err(TriggerError::InvalidIdentity(
        "source cannot be empty".to_string(),
      ));
    }
    if self
      .subscription
      .as_deref()
      .is_some_and(|s| s.trim().is_empty())
    {
      return Err(TriggerError::InvalidIdentity(format!(
        "subscription for '{}' cannot be empty",
        self.source
      )));
    }
    Ok(())
  }
}

impl fmt::Display for TriggerIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "source={}", self.source)?;
    if let Some(subscription) = &self.subscription {
      write!(f, ", subscription={}", subscription)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display() {
    let queue = TriggerIdentity::new("orders");
    assert_eq!(queue.to_string(), "source=orders");

    let topic = TriggerIdentity::new("orders").with_subscription("billing");
    assert_eq!(topic.to_string(), "source=orders, subscription=billing");
  }

  #[test]
  fn test_validate() {
    assert!(TriggerIdentity::new("orders").validate().is_ok());
    assert!(TriggerIdentity::new("  ").validate().is_err());
    assert!(
      TriggerIdentity::new("orders")
        .with_subscription("")
        .validate()
        .is_err()
    );
  }

  #[test]
  fn test_subscription_distinguishes_identities() {
    let a = TriggerIdentity::new("orders").with_subscription("billing");
    let b = TriggerIdentity::new("orders").with_subscription("shipping");
    assert_ne!(a, b);
    assert_ne!(a, TriggerIdentity::new("orders"));
  }

  #[test]
  fn test_serde_omits_missing_subscription() {
    let value = serde_json::to_value(TriggerIdentity::new("orders")).unwrap();
    assert_eq!(value, serde_json::json!({ "source": "orders" }));
  }
}
