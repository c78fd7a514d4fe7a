//! Conditional transitions (graph edges).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GraphError;

/// A directed, keyed edge between two tasks.
///
/// More than one transition may connect the same ordered pair; they are told
/// apart by `key` and by their criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
  pub source: String,
  pub destination: String,
  pub key: usize,
  /// Expressions that must all evaluate truthy for the transition to fire.
  #[serde(default)]
  pub criteria: Vec<Value>,
  /// Set the first time the transition fires.
  #[serde(default)]
  pub satisfied: bool,
  #[serde(flatten)]
  pub attributes: Map<String, Value>,
}

impl Transition {
  pub(crate) fn new(
    source: impl Into<String>,
    destination: impl Into<String>,
    key: usize,
    criteria: Vec<Value>,
  ) -> Self {
    Self {
      source: source.into(),
      destination: destination.into(),
      key,
      criteria,
      satisfied: false,
      attributes: Map::new(),
    }
  }

  /// Merge `attrs`, validating the typed ones first.
  pub(crate) fn merge(&mut self, attrs: Map<String, Value>) -> Result<(), GraphError> {
    let mut criteria = None;
    let mut satisfied = None;
    let mut rest = Map::new();

    for (key, value) in attrs {
      match key.as_str() {
        // `target` is the destination index in a node-link document.
        "source" | "destination" | "target" | "key" => {
          return Err(GraphError::InvalidAttribute {
            attribute: key,
            message: "transition identity cannot be changed".to_string(),
          });
        }
        "criteria" => match value {
          Value::Array(items) => criteria = Some(items),
          Value::Null => criteria = Some(Vec::new()),
          other => {
            return Err(GraphError::InvalidAttribute {
              attribute: key,
              message: format!("expected a list, got {}", other),
            });
          }
        },
        "satisfied" => match value {
          Value::Bool(b) => satisfied = Some(b),
          other => {
            return Err(GraphError::InvalidAttribute {
              attribute: key,
              message: format!("expected a boolean, got {}", other),
            });
          }
        },
        _ => {
          rest.insert(key, value);
        }
      }
    }

    if let Some(criteria) = criteria {
      self.criteria = criteria;
    }
    if let Some(satisfied) = satisfied {
      self.satisfied = satisfied;
    }
    self.attributes.extend(rest);
    Ok(())
  }
}
