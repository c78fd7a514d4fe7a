//! Evaluator registry.
//!
//! Maps a language name to its [`Evaluator`]. Iteration follows registration
//! order, which makes evaluator selection in [`dispatch::evaluate`] a stable
//! total order.
//!
//! [`dispatch::evaluate`]: crate::dispatch::evaluate

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::error::ExpressionError;
use crate::evaluator::Evaluator;
use crate::jinja::JinjaEvaluator;

static REGISTRY: OnceLock<Arc<EvaluatorRegistry>> = OnceLock::new();

/// The process-wide registry with the built-in evaluators.
///
/// Built on first use and shared read-only afterwards.
pub fn registry() -> &'static Arc<EvaluatorRegistry> {
  REGISTRY.get_or_init(|| Arc::new(EvaluatorRegistry::builtin()))
}

/// An ordered set of evaluators keyed by language name.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
  evaluators: Vec<Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
  /// Create an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a registry with every built-in evaluator.
  pub fn builtin() -> Self {
    let mut registry = Self::new();
    registry.register(JinjaEvaluator::default());
    registry
  }

  /// Register an evaluator under its type name.
  ///
  /// Registering a name twice replaces the earlier evaluator in place.
  pub fn register(&mut self, evaluator: impl Evaluator + 'static) -> &mut Self {
    self.register_arc(Arc::new(evaluator))
  }

  /// Register an already shared evaluator.
  pub fn register_arc(&mut self, evaluator: Arc<dyn Evaluator>) -> &mut Self {
    let name = evaluator.type_name().to_string();
    match self.evaluators.iter_mut().find(|e| e.type_name() == name) {
      Some(slot) => {
        debug!(language = %name, "replacing registered evaluator");
        *slot = evaluator;
      }
      None => {
        debug!(language = %name, "registering evaluator");
        self.evaluators.push(evaluator);
      }
    }
    self
  }

  /// Look up the evaluator for a language.
  pub fn resolve(&self, language: &str) -> Result<Arc<dyn Evaluator>, ExpressionError> {
    self
      .evaluators
      .iter()
      .find(|e| e.type_name() == language)
      .cloned()
      .ok_or_else(|| ExpressionError::UnknownLanguage(language.to_string()))
  }

  /// All registered evaluators in registration order.
  pub fn all(&self) -> impl Iterator<Item = (&str, &Arc<dyn Evaluator>)> {
    self.evaluators.iter().map(|e| (e.type_name(), e))
  }

  /// Names of all registered languages in registration order.
  pub fn names(&self) -> Vec<&str> {
    self.evaluators.iter().map(|e| e.type_name()).collect()
  }

  pub fn len(&self) -> usize {
    self.evaluators.len()
  }

  pub fn is_empty(&self) -> bool {
    self.evaluators.is_empty()
  }
}

impl std::fmt::Debug for EvaluatorRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EvaluatorRegistry")
      .field("languages", &self.names())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::jinja::JinjaConfig;

  #[test]
  fn test_builtin_registry() {
    let registry = EvaluatorRegistry::builtin();
    assert_eq!(registry.names(), vec!["jinja"]);
    assert!(registry.resolve("jinja").is_ok());
  }

  #[test]
  fn test_resolve_unknown_language() {
    let registry = EvaluatorRegistry::new();
    let err = registry.resolve("yaql").err().unwrap();
    assert!(matches!(err, ExpressionError::UnknownLanguage(ref name) if name == "yaql"));
  }

  #[test]
  fn test_register_replaces_in_place() {
    let mut registry = EvaluatorRegistry::builtin();
    registry.register(JinjaEvaluator::new(JinjaConfig {
      fuel: Some(10),
      ..Default::default()
    }));
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_process_registry_is_shared() {
    let first = registry();
    let second = registry();
    assert!(Arc::ptr_eq(first, second));
    assert!(!first.is_empty());
  }
}
