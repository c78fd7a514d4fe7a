//! Tasks (graph nodes) and their join requirements.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GraphError;
use crate::state::{State, ensure_transition};

const WILDCARD: &str = "*";

/// Join requirement of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Barrier {
  /// At least this many inbound transitions must be satisfied.
  Count(u32),
  /// Every inbound transition must be satisfied (`"*"`).
  All,
}

impl Barrier {
  /// Number of satisfied inbound transitions needed, given the total inbound.
  pub fn required(&self, inbound: usize) -> usize {
    match self {
      Barrier::Count(n) => *n as usize,
      Barrier::All => inbound,
    }
  }
}

impl TryFrom<Value> for Barrier {
  type Error = GraphError;

  fn try_from(value: Value) -> Result<Self, Self::Error> {
    let invalid = |value: &Value| GraphError::InvalidAttribute {
      attribute: "barrier".to_string(),
      message: format!("expected a positive integer or \"*\", got {}", value),
    };

    match &value {
      Value::String(s) if s == WILDCARD => Ok(Barrier::All),
      Value::Number(n) => n
        .as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .map(Barrier::Count)
        .ok_or_else(|| invalid(&value)),
      _ => Err(invalid(&value)),
    }
  }
}

impl From<Barrier> for Value {
  fn from(barrier: Barrier) -> Self {
    match barrier {
      Barrier::Count(n) => Value::from(n),
      Barrier::All => Value::from(WILDCARD),
    }
  }
}

/// A unit of workflow work and its runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<State>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub barrier: Option<Barrier>,
  /// Attributes opaque to the engine.
  #[serde(flatten)]
  pub attributes: Map<String, Value>,
}

impl Task {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: None,
      state: None,
      barrier: None,
      attributes: Map::new(),
    }
  }

  /// Display name, falling back to the id.
  pub fn name(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.id)
  }
}

/// Lightweight reference returned wherever a set of tasks is listed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
  pub id: String,
  pub name: String,
}

impl From<&Task> for TaskRef {
  fn from(task: &Task) -> Self {
    Self {
      id: task.id.clone(),
      name: task.name().to_string(),
    }
  }
}

/// Sort by name (then id) and drop duplicates.
pub(crate) fn sort_task_refs(tasks: &mut Vec<TaskRef>) {
  tasks.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
  tasks.dedup();
}

/// A parsed, validated set of attribute updates for a task.
///
/// Parsing happens before anything is applied so a rejected update leaves the
/// task untouched.
#[derive(Debug, Default)]
pub(crate) struct TaskPatch {
  state: Option<State>,
  name: Option<Option<String>>,
  barrier: Option<Option<Barrier>>,
  attributes: Map<String, Value>,
}

impl TaskPatch {
  pub(crate) fn parse(attrs: Map<String, Value>) -> Result<Self, GraphError> {
    let mut patch = TaskPatch::default();

    for (key, value) in attrs {
      match key.as_str() {
        "id" => {
          return Err(GraphError::InvalidAttribute {
            attribute: key,
            message: "task id cannot be changed".to_string(),
          });
        }
        "state" => {
          patch.state = Some(match &value {
            Value::String(s) => s.parse()?,
            other => return Err(GraphError::InvalidState(other.to_string())),
          });
        }
        "name" => {
          patch.name = Some(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => {
              return Err(GraphError::InvalidAttribute {
                attribute: key,
                message: format!("expected a string, got {}", other),
              });
            }
          });
        }
        "barrier" => {
          patch.barrier = Some(match value {
            Value::Null => None,
            Value::String(ref s) if s.is_empty() => None,
            other => Some(Barrier::try_from(other)?),
          });
        }
        _ => {
          patch.attributes.insert(key, value);
        }
      }
    }

    Ok(patch)
  }

  pub(crate) fn with_state(state: State) -> Self {
    Self {
      state: Some(state),
      ..Default::default()
    }
  }

  /// Apply to `task`, failing without changes if the state move is illegal.
  pub(crate) fn apply(self, task: &mut Task) -> Result<(), GraphError> {
    if let Some(state) = self.state {
      ensure_transition(task.state, state)?;
      task.state = Some(state);
    }
    if let Some(name) = self.name {
      task.name = name;
    }
    if let Some(barrier) = self.barrier {
      task.barrier = barrier;
    }
    task.attributes.extend(self.attributes);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
  }

  #[test]
  fn test_barrier_from_value() {
    assert_eq!(Barrier::try_from(json!("*")).unwrap(), Barrier::All);
    assert_eq!(Barrier::try_from(json!(2)).unwrap(), Barrier::Count(2));
    assert!(Barrier::try_from(json!(0)).is_err());
    assert!(Barrier::try_from(json!(-1)).is_err());
    assert!(Barrier::try_from(json!(1.5)).is_err());
    assert!(Barrier::try_from(json!("all")).is_err());
  }

  #[test]
  fn test_barrier_required() {
    assert_eq!(Barrier::Count(2).required(3), 2);
    assert_eq!(Barrier::All.required(3), 3);
  }

  #[test]
  fn test_task_serde_flattens_attributes() {
    let mut task = Task::new("t1");
    task.state = Some(State::Running);
    task.barrier = Some(Barrier::All);
    task.attributes.insert("retries".to_string(), json!(3));

    let value = serde_json::to_value(&task).unwrap();
    assert_eq!(
      value,
      json!({"id": "t1", "state": "running", "barrier": "*", "retries": 3})
    );

    let back: Task = serde_json::from_value(value).unwrap();
    assert_eq!(back, task);
  }

  #[test]
  fn test_task_name_defaults_to_id() {
    let mut task = Task::new("t1");
    assert_eq!(task.name(), "t1");
    task.name = Some("First".to_string());
    assert_eq!(task.name(), "First");
  }

  #[test]
  fn test_patch_rejects_illegal_state_without_changes() {
    let mut task = Task::new("t1");
    task.state = Some(State::Succeeded);

    let patch = TaskPatch::parse(attrs(json!({"state": "running", "x": 1}))).unwrap();
    assert!(patch.apply(&mut task).is_err());
    assert_eq!(task.state, Some(State::Succeeded));
    assert!(task.attributes.is_empty());
  }

  #[test]
  fn test_patch_parse_errors() {
    assert!(matches!(
      TaskPatch::parse(attrs(json!({"state": "bogus"}))),
      Err(GraphError::InvalidState(_))
    ));
    assert!(matches!(
      TaskPatch::parse(attrs(json!({"state": 1}))),
      Err(GraphError::InvalidState(_))
    ));
    assert!(matches!(
      TaskPatch::parse(attrs(json!({"barrier": "some"}))),
      Err(GraphError::InvalidAttribute { .. })
    ));
    assert!(matches!(
      TaskPatch::parse(attrs(json!({"id": "other"}))),
      Err(GraphError::InvalidAttribute { .. })
    ));
  }

  #[test]
  fn test_sort_task_refs() {
    let mut refs = vec![
      TaskRef { id: "b".into(), name: "same".into() },
      TaskRef { id: "c".into(), name: "alpha".into() },
      TaskRef { id: "a".into(), name: "same".into() },
      TaskRef { id: "c".into(), name: "alpha".into() },
    ];
    sort_task_refs(&mut refs);
    let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
  }
}
