//! Language-agnostic expression dispatch.
//!
//! Every operation recurses through objects (keys and values) and arrays, and
//! routes each string to the registered evaluator that claims it. Other
//! scalars pass through untouched. The same recursion serves task inputs,
//! transition criteria and any other expression-bearing structure.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ExpressionError, ValidationIssue};
use crate::evaluator::Evaluator;
use crate::registry::EvaluatorRegistry;

const MULTIPLE_TYPES_MESSAGE: &str = "Expression with multiple types is not supported.";

/// A variable referenced by an expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableRef {
  /// Type name of the evaluator that found the reference.
  pub evaluator: String,
  /// The statement the reference was found in.
  pub statement: String,
  /// Bare variable name.
  pub name: String,
}

/// Find the single evaluator that claims `text`.
///
/// Returns `Ok(None)` for plain text and `AmbiguousLanguage` when more than one
/// evaluator matches.
pub fn detect(
  registry: &EvaluatorRegistry,
  text: &str,
) -> Result<Option<Arc<dyn Evaluator>>, ExpressionError> {
  let mut matches: Vec<&Arc<dyn Evaluator>> = registry
    .all()
    .filter(|(_, e)| e.has_expressions(text))
    .map(|(_, e)| e)
    .collect();

  match matches.len() {
    0 => Ok(None),
    1 => Ok(matches.pop().cloned()),
    _ => Err(ExpressionError::AmbiguousLanguage {
      expression: text.to_string(),
      languages: matches.iter().map(|e| e.type_name().to_string()).collect(),
    }),
  }
}

/// Validate every expression in `value`, collecting all problems.
pub fn validate(registry: &EvaluatorRegistry, value: &Value) -> Vec<ValidationIssue> {
  let mut issues = Vec::new();
  validate_into(registry, value, &mut issues);
  issues
}

fn validate_into(registry: &EvaluatorRegistry, value: &Value, issues: &mut Vec<ValidationIssue>) {
  match value {
    Value::Object(map) => {
      for (key, item) in map {
        validate_str(registry, key, issues);
        validate_into(registry, item, issues);
      }
    }
    Value::Array(items) => {
      for item in items {
        validate_into(registry, item, issues);
      }
    }
    Value::String(text) => validate_str(registry, text, issues),
    _ => {}
  }
}

fn validate_str(registry: &EvaluatorRegistry, text: &str, issues: &mut Vec<ValidationIssue>) {
  match detect(registry, text) {
    Ok(Some(evaluator)) => issues.extend(evaluator.validate(text)),
    Ok(None) => {}
    Err(_) => issues.push(ValidationIssue::new(None, text, MULTIPLE_TYPES_MESSAGE)),
  }
}

/// Validate `value` and fail with the aggregated issues if there are any.
pub fn check(registry: &EvaluatorRegistry, value: &Value) -> Result<(), ExpressionError> {
  let issues = validate(registry, value);
  if issues.is_empty() {
    Ok(())
  } else {
    Err(ExpressionError::Validation(issues))
  }
}

/// Evaluate every expression in `value` against `context`.
///
/// Each string is handed to the first evaluator, in registration order, that
/// claims it. Unclaimed strings are returned unchanged. Object keys are
/// evaluated too; a key that evaluates to a non-string is rendered as JSON.
pub fn evaluate(
  registry: &EvaluatorRegistry,
  value: &Value,
  context: &Value,
) -> Result<Value, ExpressionError> {
  match value {
    Value::Object(map) => {
      let mut evaluated = serde_json::Map::with_capacity(map.len());
      for (key, item) in map {
        let key = match evaluate_str(registry, key, context)? {
          Value::String(s) => s,
          other => other.to_string(),
        };
        evaluated.insert(key, evaluate(registry, item, context)?);
      }
      Ok(Value::Object(evaluated))
    }
    Value::Array(items) => items
      .iter()
      .map(|item| evaluate(registry, item, context))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::String(text) => evaluate_str(registry, text, context),
    other => Ok(other.clone()),
  }
}

fn evaluate_str(
  registry: &EvaluatorRegistry,
  text: &str,
  context: &Value,
) -> Result<Value, ExpressionError> {
  match registry.all().find(|(_, e)| e.has_expressions(text)) {
    Some((_, evaluator)) => evaluator.evaluate(text, context),
    None => Ok(Value::String(text.to_string())),
  }
}

/// Extract every variable referenced in `value`.
///
/// The result is deduplicated and sorted by variable name.
pub fn extract_vars(registry: &EvaluatorRegistry, value: &Value) -> Vec<VariableRef> {
  let mut vars = BTreeSet::new();
  extract_into(registry, value, &mut vars);

  let mut vars: Vec<VariableRef> = vars.into_iter().collect();
  vars.sort_by(|a, b| {
    a.name
      .cmp(&b.name)
      .then_with(|| a.evaluator.cmp(&b.evaluator))
      .then_with(|| a.statement.cmp(&b.statement))
  });
  vars
}

fn extract_into(registry: &EvaluatorRegistry, value: &Value, vars: &mut BTreeSet<VariableRef>) {
  match value {
    Value::Object(map) => {
      for (key, item) in map {
        extract_str(registry, key, vars);
        extract_into(registry, item, vars);
      }
    }
    Value::Array(items) => {
      for item in items {
        extract_into(registry, item, vars);
      }
    }
    Value::String(text) => extract_str(registry, text, vars),
    _ => {}
  }
}

fn extract_str(registry: &EvaluatorRegistry, text: &str, vars: &mut BTreeSet<VariableRef>) {
  for (name, evaluator) in registry.all() {
    for token in evaluator.extract_vars(text) {
      let Some(var) = evaluator
        .var_pattern()
        .captures(&token)
        .and_then(|caps| caps.get(1))
      else {
        debug!(language = %name, token = %token, "skipping unrecognized variable reference");
        continue;
      };

      vars.insert(VariableRef {
        evaluator: name.to_string(),
        statement: text.to_string(),
        name: var.as_str().to_string(),
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use regex::Regex;
  use serde_json::json;

  /// Toy language: `ref(name)` resolves to `context[name]`.
  struct RefEvaluator {
    pattern: Regex,
    token: Regex,
  }

  impl RefEvaluator {
    fn new() -> Self {
      Self {
        pattern: Regex::new(r"ref\(([a-zA-Z0-9_\-]*)\)").unwrap(),
        token: Regex::new(r"ref\([^)]*\)").unwrap(),
      }
    }
  }

  impl Evaluator for RefEvaluator {
    fn type_name(&self) -> &str {
      "ref"
    }

    fn delimiter(&self) -> &str {
      "ref("
    }

    fn closing_delimiter(&self) -> &str {
      ")"
    }

    fn var_pattern(&self) -> &Regex {
      &self.pattern
    }

    fn has_expressions(&self, text: &str) -> bool {
      text.contains("ref(")
    }

    fn validate(&self, text: &str) -> Vec<ValidationIssue> {
      if self.token.is_match(text) {
        vec![]
      } else {
        vec![ValidationIssue::new(Some("ref"), text, "unterminated reference")]
      }
    }

    fn evaluate(&self, text: &str, data: &Value) -> Result<Value, ExpressionError> {
      let caps = self
        .pattern
        .captures(text)
        .ok_or_else(|| ExpressionError::evaluation("ref", text, "malformed reference"))?;
      Ok(data.get(&caps[1]).cloned().unwrap_or(Value::Null))
    }

    fn extract_vars(&self, text: &str) -> Vec<String> {
      self
        .token
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
    }
  }

  /// Claims anything containing `ref(` too, to force ambiguity.
  struct ShadowEvaluator {
    pattern: Regex,
  }

  impl Evaluator for ShadowEvaluator {
    fn type_name(&self) -> &str {
      "shadow"
    }

    fn delimiter(&self) -> &str {
      "ref("
    }

    fn closing_delimiter(&self) -> &str {
      ")"
    }

    fn var_pattern(&self) -> &Regex {
      &self.pattern
    }

    fn has_expressions(&self, text: &str) -> bool {
      text.contains("ref(")
    }

    fn validate(&self, _text: &str) -> Vec<ValidationIssue> {
      vec![]
    }

    fn evaluate(&self, _text: &str, _data: &Value) -> Result<Value, ExpressionError> {
      Ok(json!("shadow"))
    }

    fn extract_vars(&self, _text: &str) -> Vec<String> {
      vec![]
    }
  }

  fn ref_registry() -> EvaluatorRegistry {
    let mut registry = EvaluatorRegistry::new();
    registry.register(RefEvaluator::new());
    registry
  }

  fn ambiguous_registry() -> EvaluatorRegistry {
    let mut registry = ref_registry();
    registry.register(ShadowEvaluator {
      pattern: Regex::new(r"ref\((\w*)\)").unwrap(),
    });
    registry
  }

  #[test]
  fn test_extract_vars_dedup_and_sort() {
    let registry = ref_registry();
    let value = json!({"a": "ref(x)", "b": ["ref(y)", "ref(x)"]});

    let vars = extract_vars(&registry, &value);
    let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();

    assert_eq!(names, vec!["x", "y"]);
    assert_eq!(vars[0].evaluator, "ref");
    assert_eq!(vars[0].statement, "ref(x)");
  }

  #[test]
  fn test_extract_vars_from_keys_and_nested_values() {
    let registry = ref_registry();
    let value = json!({"ref(k)": {"inner": ["plain", 1, "ref(b) and ref(a)"]}});

    let names: Vec<String> = extract_vars(&registry, &value)
      .into_iter()
      .map(|v| v.name)
      .collect();

    assert_eq!(names, vec!["a", "b", "k"]);
  }

  #[test]
  fn test_validate_plain_text_has_no_issues() {
    let registry = ref_registry();
    assert!(validate(&registry, &json!({"a": "hello", "b": [1, true, null]})).is_empty());
  }

  #[test]
  fn test_validate_delegates_to_single_evaluator() {
    let registry = ref_registry();
    let issues = validate(&registry, &json!(["ref(ok)", "ref(broken"]));

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].type_name.as_deref(), Some("ref"));
    assert_eq!(issues[0].expression, "ref(broken");
  }

  #[test]
  fn test_validate_multiple_types_single_issue() {
    let registry = ambiguous_registry();
    let issues = validate(&registry, &json!("ref(x)"));

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].type_name, None);
    assert_eq!(issues[0].message, MULTIPLE_TYPES_MESSAGE);
  }

  #[test]
  fn test_detect_ambiguous_language() {
    let registry = ambiguous_registry();
    let err = detect(&registry, "ref(x)").err().unwrap();
    match err {
      ExpressionError::AmbiguousLanguage { languages, .. } => {
        assert_eq!(languages, vec!["ref", "shadow"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn test_check_aggregates_issues() {
    let registry = ref_registry();
    let err = check(&registry, &json!(["ref(a", "ref(b"])).unwrap_err();
    assert!(matches!(err, ExpressionError::Validation(ref issues) if issues.len() == 2));
  }

  #[test]
  fn test_evaluate_uses_registration_order() {
    let registry = ambiguous_registry();
    let result = evaluate(&registry, &json!("ref(x)"), &json!({"x": 1})).unwrap();
    assert_eq!(result, json!(1));
  }

  #[test]
  fn test_evaluate_recurses_and_passes_through() {
    let registry = ref_registry();
    let value = json!({
      "ref(key)": "ref(val)",
      "list": ["ref(num)", "literal", 3, null],
      "flag": true
    });
    let context = json!({"key": "resolved", "val": {"deep": 1}, "num": 7});

    let result = evaluate(&registry, &value, &context).unwrap();

    assert_eq!(
      result,
      json!({
        "resolved": {"deep": 1},
        "list": [7, "literal", 3, null],
        "flag": true
      })
    );
  }

  #[test]
  fn test_evaluate_non_string_key_rendered_as_json() {
    let registry = ref_registry();
    let result = evaluate(&registry, &json!({"ref(n)": 1}), &json!({"n": 42})).unwrap();
    assert_eq!(result, json!({"42": 1}));
  }

  #[test]
  fn test_evaluate_propagates_evaluator_failure() {
    let registry = ref_registry();
    let err = evaluate(&registry, &json!(["ref(broken"]), &json!({})).unwrap_err();
    match err {
      ExpressionError::Evaluation { expression, .. } => assert_eq!(expression, "ref(broken"),
      other => panic!("unexpected error: {other}"),
    }
  }
}
