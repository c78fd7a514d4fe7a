//! Trellis Graph
//!
//! Workflow graphs: tasks connected by conditional transitions, a lifecycle
//! state machine shared by tasks and workflows, and barrier (join) semantics.
//!
//! # Overview
//!
//! ```text
//! WorkflowGraph
//!   ├─ Task        (node)  id, name, state, barrier, attributes
//!   ├─ Transition  (edge)  key, criteria, satisfied, attributes
//!   └─ state             workflow-level State
//! ```
//!
//! When a task completes, [`WorkflowGraph::get_next_tasks`] evaluates the
//! criteria of its outgoing transitions through `trellis-expression`, marks
//! the fired ones satisfied, and returns the destinations whose barrier (if
//! any) is met.
//!
//! # Usage
//!
//! ```ignore
//! use trellis_graph::{Barrier, State, WorkflowGraph};
//! use serde_json::json;
//!
//! let mut graph = WorkflowGraph::new();
//! graph.add_transition("fetch", "parse", vec![json!("{{ _.ok }}")])?;
//! graph.add_transition("fetch", "alert", vec![json!("{{ not _.ok }}")])?;
//!
//! graph.update_task_state("fetch", State::Running)?;
//! graph.update_task_state("fetch", State::Succeeded)?;
//!
//! let context = json!({"ok": true});
//! let next = graph.get_next_tasks("fetch", context.as_object())?;
//! assert_eq!(next[0].id, "parse");
//! ```

mod cycle;
mod error;
mod graph;
mod serialize;
mod state;
mod task;
mod transition;

pub use error::GraphError;
pub use graph::{TASK_STATES_KEY, WorkflowGraph};
pub use serialize::{GraphAttributes, Link, NodeLinkGraph};
pub use state::{State, ensure_transition, is_transition_valid};
pub use task::{Barrier, Task, TaskRef};
pub use transition::Transition;
