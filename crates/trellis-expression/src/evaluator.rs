//! The capability contract every expression language implements.

use regex::Regex;
use serde_json::Value;

use crate::error::{ExpressionError, ValidationIssue};

/// A pluggable expression language.
///
/// Evaluators are stateless values held by the [`EvaluatorRegistry`]. Each one
/// owns its own delimiter syntax, which it uses to recognize its expressions
/// inside surrounding text.
///
/// [`EvaluatorRegistry`]: crate::EvaluatorRegistry
pub trait Evaluator: Send + Sync {
  /// Identifier tag of the language, also used as its registry name.
  fn type_name(&self) -> &str;

  /// Opening delimiter of an expression (e.g. `{{`).
  fn delimiter(&self) -> &str;

  /// Closing delimiter matching [`delimiter`](Self::delimiter) (e.g. `}}`).
  fn closing_delimiter(&self) -> &str;

  /// Pattern recovering a bare variable name from a raw reference token.
  ///
  /// The first capture group must hold the variable name.
  fn var_pattern(&self) -> &Regex;

  /// Whether `text` contains at least one expression in this language.
  fn has_expressions(&self, text: &str) -> bool;

  /// Check every expression in `text`, returning one issue per problem.
  fn validate(&self, text: &str) -> Vec<ValidationIssue>;

  /// Evaluate `text` against `data`.
  fn evaluate(&self, text: &str, data: &Value) -> Result<Value, ExpressionError>;

  /// Raw variable-reference tokens found in `text` (e.g. `_.user.name`).
  fn extract_vars(&self, text: &str) -> Vec<String>;

  /// Remove one leading opening and one trailing closing delimiter from
  /// `expr`, plus surrounding whitespace.
  fn strip_delimiter(&self, expr: &str) -> String {
    let expr = expr.trim();
    let expr = expr.strip_prefix(self.delimiter()).unwrap_or(expr);
    let expr = expr.strip_suffix(self.closing_delimiter()).unwrap_or(expr);
    expr.trim().to_string()
  }
}

/// Build the default variable-reference pattern for a variable symbol.
///
/// For symbol `_` this matches `_.name` and captures `name`.
pub fn var_pattern_for_symbol(symbol: &str) -> Regex {
  Regex::new(&format!(r"{}\.([a-zA-Z0-9_\-]*)\.?", regex::escape(symbol)))
    .expect("escaped variable pattern is valid")
}

/// Truthiness of an evaluated value.
///
/// `null`, `false`, zero, and empty strings, arrays and objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(a) => !a.is_empty(),
    Value::Object(o) => !o.is_empty(),
  }
}
