//! Expression evaluation using minijinja.
//!
//! An input is evaluated in one of three forms:
//!
//! - Exactly one `{{ ... }}` block: compiled as an expression, the value keeps
//!   its type (`"{{ input.order }}"` yields an object, `"{{ count + 1 }}"` a number).
//! - Text mixing template syntax and literal text: rendered to a string
//!   (`"Hello {{ name }}!"`).
//! - Text without template syntax: taken literally as a string.
//!
//! Undefined variables, and attributes of undefined values, evaluate to null.

use minijinja::value::Value;
use minijinja::{Environment, Error, ErrorKind, State, UndefinedBehavior};

use crate::ExpressionEvaluator;
use crate::context::ExpressionContext;
use crate::error::EvaluationError;

/// Key under which workflow metadata is exposed to helper functions.
const WORKFLOW_KEY: &str = "_workflow";

enum Form<'a> {
  Expression(&'a str),
  Template,
  Literal,
}

fn classify(expression: &str) -> Form<'_> {
  let trimmed = expression.trim();
  if let Some(inner) = trimmed
    .strip_prefix("{{")
    .and_then(|rest| rest.strip_suffix("}}"))
    && !inner.contains("{{")
    && !inner.contains("}}")
  {
    return Form::Expression(inner.trim());
  }

  if ["{{", "{%", "{#"].iter().any(|m| expression.contains(m)) {
    Form::Template
  } else {
    Form::Literal
  }
}

/// The default evaluator.
pub struct JinjaEvaluator {
  env: Environment<'static>,
}

impl JinjaEvaluator {
  pub fn new() -> Self {
    let mut env = Environment::new();
    // `input.missing.field` is null rather than an error.
    env.set_undefined_behavior(UndefinedBehavior::Chainable);

    env.add_function("workflow_instance_id", workflow_instance_id);
    env.add_function("correlation_id", correlation_id);
    env.add_function("variable", variable);
    env.add_function("is_null_or_empty", is_null_or_empty);
    env.add_function("is_null_or_whitespace", is_null_or_whitespace);
    env.add_filter("to_json", to_json);

    Self { env }
  }

  fn context_value(&self, context: &ExpressionContext) -> serde_json::Value {
    let mut namespace = context.namespace();
    namespace.insert(
      WORKFLOW_KEY.to_string(),
      serde_json::json!({
        "instance_id": context.workflow_instance_id,
        "correlation_id": context.correlation_id,
        "activity_id": context.activity_id,
      }),
    );
    serde_json::Value::Object(namespace)
  }
}

impl Default for JinjaEvaluator {
  fn default() -> Self {
    Self::new()
  }
}

impl ExpressionEvaluator for JinjaEvaluator {
  fn evaluate(
    &self,
    expression: &str,
    context: &ExpressionContext,
  ) -> Result<serde_json::Value, EvaluationError> {
    let fail = |e: Error| EvaluationError::new(expression, e.to_string());

    match classify(expression) {
      Form::Expression(inner) => {
        let compiled = self.env.compile_expression(inner).map_err(fail)?;
        let value = compiled.eval(self.context_value(context)).map_err(fail)?;
        serde_json::to_value(&value).map_err(|e| EvaluationError::new(expression, e.to_string()))
      }
      Form::Template => self
        .env
        .render_str(expression, self.context_value(context))
        .map(serde_json::Value::String)
        .map_err(fail),
      Form::Literal => Ok(serde_json::Value::String(expression.to_string())),
    }
  }
}

fn workflow_attr(state: &State, name: &str) -> Value {
  state
    .lookup(WORKFLOW_KEY)
    .and_then(|workflow| workflow.get_attr(name).ok())
    .unwrap_or(Value::UNDEFINED)
}

fn workflow_instance_id(state: &State) -> Value {
  workflow_attr(state, "instance_id")
}

fn correlation_id(state: &State) -> Value {
  workflow_attr(state, "correlation_id")
}

fn variable(state: &State, name: &str) -> Value {
  state.lookup(name).unwrap_or(Value::UNDEFINED)
}

fn is_null_or_empty(value: Value) -> bool {
  value.is_undefined() || value.is_none() || value.as_str().is_some_and(|s| s.is_empty())
}

fn is_null_or_whitespace(value: Value) -> bool {
  value.is_undefined() || value.is_none() || value.as_str().is_some_and(|s| s.trim().is_empty())
}

fn to_json(value: Value) -> Result<String, Error> {
  serde_json::to_string(&value).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context(variables: serde_json::Value) -> ExpressionContext {
    let variables = match variables {
      serde_json::Value::Object(map) => map,
      _ => panic!("variables must be an object"),
    };
    ExpressionContext::new("instance-1", "activity-1")
      .with_variables(variables)
      .with_correlation_id(Some("order-42".to_string()))
  }

  #[test]
  fn test_single_expression_keeps_type() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({ "input": { "order": { "id": 7, "lines": [1, 2, 3] } } }));

    let order = evaluator.evaluate("{{ input.order }}", &ctx).unwrap();
    assert_eq!(order, json!({ "id": 7, "lines": [1, 2, 3] }));

    let count = evaluator.evaluate("{{ input.order.lines | length }}", &ctx).unwrap();
    assert_eq!(count, json!(3));

    let flag = evaluator.evaluate("{{ input.order.id > 5 }}", &ctx).unwrap();
    assert_eq!(flag, json!(true));
  }

  #[test]
  fn test_mixed_template_renders_string() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({ "name": "alice", "count": 5 }));

    let value = evaluator
      .evaluate("Hello {{ name | title }}, you have {{ count }} messages", &ctx)
      .unwrap();
    assert_eq!(value, json!("Hello Alice, you have 5 messages"));
  }

  #[test]
  fn test_literal_is_string() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({}));

    assert_eq!(evaluator.evaluate("orders", &ctx).unwrap(), json!("orders"));
    assert_eq!(evaluator.evaluate("42", &ctx).unwrap(), json!("42"));
    assert_eq!(evaluator.evaluate("", &ctx).unwrap(), json!(""));
  }

  #[test]
  fn test_undefined_variable_is_null() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({}));

    assert_eq!(evaluator.evaluate("{{ missing }}", &ctx).unwrap(), json!(null));
    assert_eq!(
      evaluator.evaluate("{{ missing.deeper.field }}", &ctx).unwrap(),
      json!(null)
    );
  }

  #[test]
  fn test_resume_payload_is_visible() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({})).with_resume(Some(json!({ "amount": 12 })));

    assert_eq!(evaluator.evaluate("{{ resume.amount }}", &ctx).unwrap(), json!(12));

    let without = context(json!({}));
    assert_eq!(evaluator.evaluate("{{ resume }}", &without).unwrap(), json!(null));
  }

  #[test]
  fn test_workflow_functions() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({ "total": 10 }));

    assert_eq!(
      evaluator.evaluate("{{ workflow_instance_id() }}", &ctx).unwrap(),
      json!("instance-1")
    );
    assert_eq!(
      evaluator.evaluate("{{ correlation_id() }}", &ctx).unwrap(),
      json!("order-42")
    );
    assert_eq!(
      evaluator.evaluate("{{ variable('total') }}", &ctx).unwrap(),
      json!(10)
    );
  }

  #[test]
  fn test_null_or_empty_helpers() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({ "blank": "  ", "empty": "", "name": "x", "nothing": null }));

    let eval = |e: &str| evaluator.evaluate(e, &ctx).unwrap();
    assert_eq!(eval("{{ is_null_or_empty(empty) }}"), json!(true));
    assert_eq!(eval("{{ is_null_or_empty(nothing) }}"), json!(true));
    assert_eq!(eval("{{ is_null_or_empty(missing) }}"), json!(true));
    assert_eq!(eval("{{ is_null_or_empty(blank) }}"), json!(false));
    assert_eq!(eval("{{ is_null_or_whitespace(blank) }}"), json!(true));
    assert_eq!(eval("{{ is_null_or_whitespace(name) }}"), json!(false));
  }

  #[test]
  fn test_to_json_filter() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({ "order": { "id": 7 } }));

    let value = evaluator.evaluate("{{ order | to_json }}", &ctx).unwrap();
    assert_eq!(value, json!(r#"{"id":7}"#));
  }

  #[test]
  fn test_invalid_expression_fails() {
    let evaluator = JinjaEvaluator::new();
    let ctx = context(json!({}));

    let err = evaluator.evaluate("{{ 1 + }}", &ctx).unwrap_err();
    assert_eq!(err.expression, "{{ 1 + }}");

    assert!(evaluator.evaluate("{% if %}", &ctx).is_err());
  }
}
