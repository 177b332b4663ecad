use crate::pointer::PointerId;
use crate::scope::ScopeId;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
  #[error("scope not found: {0}")]
  ScopeNotFound(ScopeId),

  #[error("execution pointer not found: {0}")]
  PointerNotFound(PointerId),

  #[error("the instance scope cannot be removed")]
  InstanceScope,

  #[error("inconsistent instance state: {0}")]
  Inconsistent(String),
}
