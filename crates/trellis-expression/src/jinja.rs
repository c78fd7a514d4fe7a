//! Jinja expressions backed by minijinja.
//!
//! Expressions are written as `{{ ... }}` (or `{% ... %}` blocks) and see the
//! evaluation context as `_`:
//!
//! ```text
//! {{ _.count > 1 }}                   -> true
//! {{ _.user }}                        -> {"name": "ada"}
//! Hello {{ _.user.name | title }}!    -> "Hello Ada!"
//! ```
//!
//! A string made of a single `{{ }}` expression evaluates to the expression's
//! native value; anything else renders to a string.

use std::sync::LazyLock;

use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde_json::{Value, json};

use crate::error::{ExpressionError, ValidationIssue};
use crate::evaluator::{Evaluator, var_pattern_for_symbol};

const TYPE_NAME: &str = "jinja";
const DELIMITER: &str = "{{";
const CLOSING_DELIMITER: &str = "}}";
const VAR_SYMBOL: &str = "_";

/// Default fuel per evaluation.
pub const DEFAULT_FUEL: u64 = 50_000;

static EXPRESSION: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("valid expression regex"));
static BLOCK: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)\{%(.*?)%\}").expect("valid block regex"));
static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b_\.[a-zA-Z0-9_]+(?:\.[a-zA-Z0-9_]+)*").expect("valid variable regex")
});

/// Configuration for the jinja evaluator.
#[derive(Debug, Clone)]
pub struct JinjaConfig {
  /// Instruction budget per evaluation. `None` disables the limit.
  pub fuel: Option<u64>,
  /// Fail on undefined variables instead of treating them as empty.
  pub strict_undefined: bool,
}

impl Default for JinjaConfig {
  fn default() -> Self {
    Self {
      fuel: Some(DEFAULT_FUEL),
      strict_undefined: false,
    }
  }
}

/// The built-in `jinja` evaluator.
pub struct JinjaEvaluator {
  config: JinjaConfig,
  var_pattern: Regex,
}

impl JinjaEvaluator {
  pub fn new(config: JinjaConfig) -> Self {
    Self {
      config,
      var_pattern: var_pattern_for_symbol(VAR_SYMBOL),
    }
  }

  /// A fresh environment borrowing from the statement being processed.
  fn environment<'source>(&self) -> Environment<'source> {
    let mut env = Environment::new();
    env.set_fuel(self.config.fuel);
    if self.config.strict_undefined {
      env.set_undefined_behavior(UndefinedBehavior::Strict);
    }
    env
  }

  /// Whether `text` is exactly one `{{ }}` expression.
  fn is_sole_expression(text: &str) -> bool {
    let trimmed = text.trim();
    let mut matches = EXPRESSION.find_iter(trimmed);
    let Some(whole) = matches.next() else {
      return false;
    };
    matches.next().is_none()
      && !BLOCK.is_match(trimmed)
      && whole.start() == 0
      && whole.end() == trimmed.len()
  }

  fn segments(text: &str) -> impl Iterator<Item = &str> {
    EXPRESSION
      .captures_iter(text)
      .chain(BLOCK.captures_iter(text))
      .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
  }
}

impl Default for JinjaEvaluator {
  fn default() -> Self {
    Self::new(JinjaConfig::default())
  }
}

impl Evaluator for JinjaEvaluator {
  fn type_name(&self) -> &str {
    TYPE_NAME
  }

  fn delimiter(&self) -> &str {
    DELIMITER
  }

  fn closing_delimiter(&self) -> &str {
    CLOSING_DELIMITER
  }

  fn var_pattern(&self) -> &Regex {
    &self.var_pattern
  }

  fn has_expressions(&self, text: &str) -> bool {
    EXPRESSION.is_match(text) || BLOCK.is_match(text)
  }

  fn validate(&self, text: &str) -> Vec<ValidationIssue> {
    let env = self.environment();
    let mut issues = Vec::new();

    for caps in EXPRESSION.captures_iter(text) {
      let whole = caps.get(0).map_or("", |m| m.as_str());
      let body = caps.get(1).map_or("", |m| m.as_str()).trim();
      if let Err(e) = env.compile_expression(body) {
        issues.push(ValidationIssue::new(Some(TYPE_NAME), whole, e.to_string()));
      }
    }

    if BLOCK.is_match(text)
      && let Err(e) = env.template_from_str(text)
    {
      issues.push(ValidationIssue::new(Some(TYPE_NAME), text, e.to_string()));
    }

    issues
  }

  fn evaluate(&self, text: &str, data: &Value) -> Result<Value, ExpressionError> {
    let ctx = json!({ "_": data });

    if Self::is_sole_expression(text) {
      let body = self.strip_delimiter(text);
      let env = self.environment();
      let value = env
        .compile_expression(&body)
        .and_then(|expr| expr.eval(&ctx))
        .map_err(|e| ExpressionError::evaluation(TYPE_NAME, text, e))?;
      return serde_json::to_value(&value)
        .map_err(|e| ExpressionError::evaluation(TYPE_NAME, text, e));
    }

    self
      .environment()
      .render_str(text, &ctx)
      .map(Value::String)
      .map_err(|e| ExpressionError::evaluation(TYPE_NAME, text, e))
  }

  fn extract_vars(&self, text: &str) -> Vec<String> {
    Self::segments(text)
      .flat_map(|segment| VAR_REF.find_iter(segment).map(|m| m.as_str().to_string()))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn jinja() -> JinjaEvaluator {
    JinjaEvaluator::default()
  }

  #[test]
  fn test_has_expressions() {
    let e = jinja();
    assert!(e.has_expressions("{{ _.x }}"));
    assert!(e.has_expressions("prefix {{ _.x }} suffix"));
    assert!(e.has_expressions("{% if _.x %}yes{% endif %}"));
    assert!(!e.has_expressions("plain text"));
    assert!(!e.has_expressions("<% $.x %>"));
  }

  #[test]
  fn test_evaluate_native_value() {
    let e = jinja();
    let data = json!({"count": 2, "user": {"name": "ada"}});

    assert_eq!(e.evaluate("{{ _.count > 1 }}", &data).unwrap(), json!(true));
    assert_eq!(e.evaluate("  {{ _.count + 1 }} ", &data).unwrap(), json!(3));
    assert_eq!(
      e.evaluate("{{ _.user }}", &data).unwrap(),
      json!({"name": "ada"})
    );
  }

  #[test]
  fn test_evaluate_renders_mixed_text() {
    let e = jinja();
    let data = json!({"user": {"name": "ada"}, "n": 3});

    assert_eq!(
      e.evaluate("Hello {{ _.user.name | title }}, {{ _.n }} new", &data)
        .unwrap(),
      json!("Hello Ada, 3 new")
    );
    assert_eq!(
      e.evaluate("{% if _.n > 2 %}many{% else %}few{% endif %}", &data)
        .unwrap(),
      json!("many")
    );
  }

  #[test]
  fn test_evaluate_missing_variable_is_null() {
    let e = jinja();
    assert_eq!(e.evaluate("{{ _.missing }}", &json!({})).unwrap(), json!(null));
  }

  #[test]
  fn test_strict_undefined_fails() {
    let e = JinjaEvaluator::new(JinjaConfig {
      strict_undefined: true,
      ..Default::default()
    });
    let err = e.evaluate("{{ _.missing.deeper }}", &json!({})).unwrap_err();
    assert!(matches!(err, ExpressionError::Evaluation { ref evaluator, .. } if evaluator == "jinja"));
  }

  #[test]
  fn test_fuel_bounds_evaluation() {
    let e = JinjaEvaluator::new(JinjaConfig {
      fuel: Some(10),
      ..Default::default()
    });
    let result = e.evaluate(
      "{% for i in range(1000) %}{{ i }}{% endfor %}",
      &json!({}),
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_validate() {
    let e = jinja();
    assert!(e.validate("{{ _.a and _.b }}").is_empty());

    let issues = e.validate("{{ _.a + }} and {{ _.b }}");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].type_name.as_deref(), Some("jinja"));
    assert_eq!(issues[0].expression, "{{ _.a + }}");

    let issues = e.validate("{% if _.a %}unterminated");
    assert_eq!(issues.len(), 1);
  }

  #[test]
  fn test_extract_vars() {
    let e = jinja();
    let vars = e.extract_vars("{{ _.a.b + _.c }} not_.x {% if _.d %}{% endif %}");
    assert_eq!(vars, vec!["_.a.b", "_.c", "_.d"]);
    assert!(e.extract_vars("_.outside").is_empty());
  }

  #[test]
  fn test_strip_delimiter() {
    let e = jinja();
    assert_eq!(e.strip_delimiter("{{ _.x }}"), "_.x");
    assert_eq!(e.strip_delimiter("  {{_.a.b}} "), "_.a.b");
    // Only one delimiter pair is removed.
    assert_eq!(e.strip_delimiter("{{ {'a': 1} }}"), "{'a': 1}");
    assert_eq!(e.strip_delimiter("_.x"), "_.x");
  }

  #[test]
  fn test_sole_expression_keeps_inner_braces() {
    let e = jinja();
    let value = e.evaluate("{{ {'n': _.x} }}", &json!({"x": 2})).unwrap();
    assert_eq!(value, json!({"n": 2}));
  }
}
