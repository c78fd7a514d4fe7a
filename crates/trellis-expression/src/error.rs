//! Expression errors.

use serde::{Deserialize, Serialize};

/// A single problem found while validating an expression.
///
/// Validation collects these instead of failing on the first one, so a whole
/// workflow definition can be reported at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationIssue {
  /// Evaluator that reported the issue, if a single one could be determined.
  #[serde(rename = "type")]
  pub type_name: Option<String>,
  /// The offending statement.
  pub expression: String,
  pub message: String,
}

impl ValidationIssue {
  pub fn new(
    type_name: Option<&str>,
    expression: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      type_name: type_name.map(str::to_string),
      expression: expression.into(),
      message: message.into(),
    }
  }
}

/// Errors raised by the expression layer.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
  /// Aggregate of every validation problem found in a value.
  #[error("expression validation failed with {} issue(s)", .0.len())]
  Validation(Vec<ValidationIssue>),

  /// More than one evaluator claims the same text.
  #[error("expression with multiple types is not supported: '{expression}' ({})", languages.join(", "))]
  AmbiguousLanguage {
    expression: String,
    languages: Vec<String>,
  },

  /// An evaluator failed at run time.
  #[error("failed to evaluate {evaluator} expression '{expression}': {message}")]
  Evaluation {
    evaluator: String,
    expression: String,
    message: String,
  },

  /// No evaluator is registered under the requested name.
  #[error("no expression evaluator registered for language '{0}'")]
  UnknownLanguage(String),
}

impl ExpressionError {
  pub fn evaluation(
    evaluator: &str,
    expression: impl Into<String>,
    message: impl std::fmt::Display,
  ) -> Self {
    Self::Evaluation {
      evaluator: evaluator.to_string(),
      expression: expression.into(),
      message: message.to_string(),
    }
  }
}
