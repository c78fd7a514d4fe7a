use thiserror::Error;
use trellis_expression::ExpressionError;

use crate::state::State;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("task '{0}' does not exist")]
  TaskNotFound(String),

  #[error("transition does not exist: from={from}, to={to}")]
  TransitionNotFound { from: String, to: String },

  #[error("more than one transition matches: from={from}, to={to}")]
  AmbiguousTransition { from: String, to: String },

  #[error("state '{0}' is not valid")]
  InvalidState(String),

  #[error("invalid state transition from '{}' to '{new}'", .old.map_or("unset", |s| s.as_str()))]
  InvalidStateTransition { old: Option<State>, new: State },

  #[error("invalid value for attribute '{attribute}': {message}")]
  InvalidAttribute { attribute: String, message: String },

  #[error("invalid graph document: {0}")]
  InvalidDocument(String),

  #[error(transparent)]
  Expression(#[from] ExpressionError),
}
