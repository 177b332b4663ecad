use serde::{Deserialize, Serialize};

/// Policy a Join uses to decide when the branches of its Fork are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
  /// Fire once every branch completed. The first branch fault fails the join.
  #[default]
  WaitAll,
  /// Fire on the first completed branch and cancel the others.
  WaitAny,
}
