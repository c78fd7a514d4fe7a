//! Task and workflow states.
//!
//! Every state change, for a task or for the workflow itself, is checked
//! against [`is_transition_valid`] before it is applied.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
  Requested,
  Scheduled,
  Delayed,
  Running,
  Pending,
  Pausing,
  Paused,
  Resuming,
  Canceling,
  Canceled,
  Succeeded,
  Failed,
  Expired,
  Abandoned,
}

use State::*;

impl State {
  pub const ALL: [State; 14] = [
    Requested, Scheduled, Delayed, Running, Pending, Pausing, Paused, Resuming, Canceling,
    Canceled, Succeeded, Failed, Expired, Abandoned,
  ];

  /// States after which a task's outgoing transitions may be evaluated.
  pub const COMPLETED: [State; 5] = [Succeeded, Failed, Expired, Abandoned, Canceled];

  pub fn as_str(&self) -> &'static str {
    match self {
      Requested => "requested",
      Scheduled => "scheduled",
      Delayed => "delayed",
      Running => "running",
      Pending => "pending",
      Pausing => "pausing",
      Paused => "paused",
      Resuming => "resuming",
      Canceling => "canceling",
      Canceled => "canceled",
      Succeeded => "succeeded",
      Failed => "failed",
      Expired => "expired",
      Abandoned => "abandoned",
    }
  }

  pub fn is_completed(&self) -> bool {
    Self::COMPLETED.contains(self)
  }

  /// States reachable in one step from `old` (`None` = not started).
  pub fn successors(old: Option<State>) -> &'static [State] {
    match old {
      None => &[Requested, Scheduled, Delayed, Running],
      Some(Requested) => &[Scheduled, Delayed, Running, Canceling, Canceled, Failed],
      Some(Scheduled) => &[Running, Delayed, Canceling, Canceled, Failed],
      Some(Delayed) => &[Requested, Scheduled, Running, Canceling, Canceled],
      Some(Running) => &[
        Pending, Pausing, Paused, Succeeded, Failed, Expired, Abandoned, Canceling, Canceled,
      ],
      Some(Pending) => &[Running, Canceling, Canceled, Abandoned],
      Some(Pausing) => &[Paused, Succeeded, Failed, Canceling, Canceled],
      Some(Paused) => &[Resuming, Running, Canceling, Canceled],
      Some(Resuming) => &[Running, Paused, Failed, Canceling, Canceled],
      Some(Canceling) => &[Canceled, Succeeded, Failed, Expired, Abandoned],
      Some(Canceled | Succeeded | Failed | Expired | Abandoned) => &[],
    }
  }
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for State {
  type Err = GraphError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .iter()
      .find(|state| state.as_str() == s)
      .copied()
      .ok_or_else(|| GraphError::InvalidState(s.to_string()))
  }
}

/// Whether moving from `old` to `new` is allowed.
///
/// Reporting the current state again is always allowed.
pub fn is_transition_valid(old: Option<State>, new: State) -> bool {
  old == Some(new) || State::successors(old).contains(&new)
}

/// Fail with `InvalidStateTransition` unless `old -> new` is allowed.
pub fn ensure_transition(old: Option<State>, new: State) -> Result<(), GraphError> {
  if is_transition_valid(old, new) {
    Ok(())
  } else {
    Err(GraphError::InvalidStateTransition { old, new })
  }
}
