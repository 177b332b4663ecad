//! Expression evaluation for activity inputs.
//!
//! The engine never looks at expression syntax. It hands the evaluator an
//! expression string plus an [`ExpressionContext`] (the flattened variable
//! view of the activity's scope) and consumes the resulting value or error.
//!
//! [`JinjaEvaluator`] is the default implementation, built on minijinja.

mod context;
mod error;
mod jinja;

pub use context::ExpressionContext;
pub use error::EvaluationError;
pub use jinja::JinjaEvaluator;

/// Capability that turns expression text into a value.
pub trait ExpressionEvaluator: Send + Sync {
  /// Evaluate `expression` against `context`.
  fn evaluate(
    &self,
    expression: &str,
    context: &ExpressionContext,
  ) -> Result<serde_json::Value, EvaluationError>;
}
