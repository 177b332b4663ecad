//! Input expression types for activity configuration.
//!
//! Every declared input is an expression string evaluated against the
//! variables visible from the activity's scope.
//!
//! # Examples
//!
//! ```json
//! {
//!   "order": "{{ input.order }}",
//!   "count": "{{ items | length }}",
//!   "message": "Hello {{ name | title }}!",
//!   "queue": "orders"
//! }
//! ```
//!
//! With the default evaluator:
//! - `"{{ input.order }}"` (a single expression) keeps its type, e.g. an object
//! - `"{{ items | length }}"` → `3`
//! - `"Hello {{ name | title }}!"` (mixed text) → `"Hello John!"`
//! - `"orders"` (no template syntax) → the literal string `"orders"`

/// An input value is expression text that gets evaluated at runtime.
pub type InputValue = String;
