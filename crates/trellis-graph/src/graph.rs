//! The workflow graph.
//!
//! A directed multigraph of [`Task`]s connected by conditional
//! [`Transition`]s, plus a workflow-level state. The graph owns every task and
//! transition for its whole lifetime; nothing is ever removed.
//!
//! All operations are synchronous. Callers sharing one graph between workers
//! must serialize mutations, e.g. through the coordinator in `trellis-engine`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use trellis_expression::{
  EvaluatorRegistry, ValidationIssue, VariableRef, dispatch, is_truthy, registry,
};

use crate::cycle::cycles_through;
use crate::error::GraphError;
use crate::state::{State, ensure_transition};
use crate::task::{Barrier, Task, TaskPatch, TaskRef, sort_task_refs};
use crate::transition::Transition;

/// Context key holding every task's current state during criteria evaluation.
pub const TASK_STATES_KEY: &str = "__task_states";

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
  pub(crate) graph: DiGraph<Task, Transition>,
  pub(crate) index: HashMap<String, NodeIndex>,
  pub(crate) state: Option<State>,
  /// Workflow-level attributes other than `state`.
  pub(crate) attributes: Map<String, Value>,
  evaluators: Arc<EvaluatorRegistry>,
}

impl Default for WorkflowGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl WorkflowGraph {
  /// Create an empty graph using the process-wide evaluator registry.
  pub fn new() -> Self {
    Self::with_registry(registry().clone())
  }

  /// Create an empty graph that evaluates criteria through `evaluators`.
  pub fn with_registry(evaluators: Arc<EvaluatorRegistry>) -> Self {
    Self {
      graph: DiGraph::new(),
      index: HashMap::new(),
      state: None,
      attributes: Map::new(),
      evaluators,
    }
  }

  /// The evaluator registry criteria are dispatched through.
  pub fn evaluators(&self) -> &Arc<EvaluatorRegistry> {
    &self.evaluators
  }

  // ---------------------------------------------------------------------------
  // Workflow state
  // ---------------------------------------------------------------------------

  pub fn state(&self) -> Option<State> {
    self.state
  }

  /// Move the workflow to `state`, checked against the state machine.
  pub fn set_state(&mut self, state: State) -> Result<(), GraphError> {
    ensure_transition(self.state, state)?;
    info!(old = ?self.state, new = %state, "workflow state changed");
    self.state = Some(state);
    Ok(())
  }

  /// Like [`set_state`](Self::set_state), parsing the state name first.
  pub fn set_state_str(&mut self, state: &str) -> Result<(), GraphError> {
    self.set_state(state.parse()?)
  }

  pub fn attributes(&self) -> &Map<String, Value> {
    &self.attributes
  }

  // ---------------------------------------------------------------------------
  // Tasks
  // ---------------------------------------------------------------------------

  pub fn has_task(&self, task_id: &str) -> bool {
    self.index.contains_key(task_id)
  }

  /// An owned copy of the task; changing it never affects the graph.
  pub fn get_task(&self, task_id: &str) -> Result<Task, GraphError> {
    Ok(self.graph[self.node(task_id)?].clone())
  }

  /// All tasks in insertion order.
  pub fn tasks(&self) -> impl Iterator<Item = &Task> {
    self.graph.node_weights()
  }

  pub fn task_count(&self) -> usize {
    self.graph.node_count()
  }

  /// Create the task, or update it if it already exists.
  pub fn add_task(&mut self, task_id: &str, attrs: Map<String, Value>) -> Result<(), GraphError> {
    if self.has_task(task_id) {
      return self.update_task(task_id, attrs);
    }

    let mut task = Task::new(task_id);
    TaskPatch::parse(attrs)?.apply(&mut task)?;

    debug!(task_id = %task_id, "task added");
    let idx = self.graph.add_node(task);
    self.index.insert(task_id.to_string(), idx);
    Ok(())
  }

  /// Merge `attrs` into the task.
  ///
  /// A `state` entry is checked against the state machine first; if the move
  /// is illegal nothing is changed.
  pub fn update_task(&mut self, task_id: &str, attrs: Map<String, Value>) -> Result<(), GraphError> {
    let idx = self.node(task_id)?;
    let patch = TaskPatch::parse(attrs)?;
    self.apply_patch(idx, patch)
  }

  /// Move a task to `state`.
  pub fn update_task_state(&mut self, task_id: &str, state: State) -> Result<(), GraphError> {
    let idx = self.node(task_id)?;
    self.apply_patch(idx, TaskPatch::with_state(state))
  }

  fn apply_patch(&mut self, idx: NodeIndex, patch: TaskPatch) -> Result<(), GraphError> {
    let task = &mut self.graph[idx];
    let old = task.state;
    patch.apply(task)?;

    if task.state != old {
      debug!(task_id = %task.id, old = ?old, new = ?task.state, "task state changed");
    }
    Ok(())
  }

  /// Re-arm a task for re-entry.
  ///
  /// Only `name` and `barrier` survive. The `satisfied` flag of every inbound
  /// transition is cleared as well, so a join does not fire immediately on
  /// stale branches from the previous pass.
  pub fn reset_task(&mut self, task_id: &str) -> Result<(), GraphError> {
    let idx = self.node(task_id)?;

    let task = &mut self.graph[idx];
    task.state = None;
    task.attributes.clear();

    let inbound: Vec<EdgeIndex> = self
      .graph
      .edges_directed(idx, Direction::Incoming)
      .map(|e| e.id())
      .collect();
    for edge in &inbound {
      self.graph[*edge].satisfied = false;
    }

    debug!(task_id = %task_id, inbound = inbound.len(), "task reset");
    Ok(())
  }

  /// Current state of every task, keyed by id.
  pub fn get_task_states(&self) -> BTreeMap<String, Option<State>> {
    self
      .graph
      .node_weights()
      .map(|t| (t.id.clone(), t.state))
      .collect()
  }

  /// Tasks with no inbound transitions, sorted by name.
  pub fn get_start_tasks(&self) -> Vec<TaskRef> {
    let mut tasks: Vec<TaskRef> = self
      .graph
      .node_indices()
      .filter(|idx| {
        self
          .graph
          .edges_directed(*idx, Direction::Incoming)
          .next()
          .is_none()
      })
      .map(|idx| TaskRef::from(&self.graph[idx]))
      .collect();

    sort_task_refs(&mut tasks);
    tasks
  }

  /// Tasks that became eligible now that `task_id` has completed.
  ///
  /// Returns nothing while the task is not in a completed state. Otherwise
  /// each outgoing transition's criteria are evaluated against `context`
  /// (extended with `__task_states`); fired transitions are marked satisfied,
  /// and destinations with a barrier are only returned once enough of their
  /// inbound transitions are satisfied.
  #[instrument(name = "get_next_tasks", skip(self, context), fields(task_id = %task_id))]
  pub fn get_next_tasks(
    &mut self,
    task_id: &str,
    context: Option<&Map<String, Value>>,
  ) -> Result<Vec<TaskRef>, GraphError> {
    let idx = self.node(task_id)?;

    if !self.graph[idx].state.is_some_and(|s| s.is_completed()) {
      debug!(state = ?self.graph[idx].state, "task not completed, no next tasks");
      return Ok(Vec::new());
    }

    let context = self.criteria_context(context);

    let mut fired = Vec::new();
    for edge in self.sorted_edges(idx, Direction::Outgoing) {
      if self.criteria_met(&self.graph[edge].criteria, &context)? {
        fired.push(edge);
      }
    }

    let mut tasks = Vec::new();
    for edge in fired {
      let Some((_, next)) = self.graph.edge_endpoints(edge) else {
        continue;
      };

      let transition = &mut self.graph[edge];
      if !transition.satisfied {
        transition.satisfied = true;
        debug!(
          to = %transition.destination,
          key = transition.key,
          "transition satisfied"
        );
      }

      if let Some(barrier) = self.graph[next].barrier {
        let (satisfied, inbound) = self.inbound_counts(next);
        let required = barrier.required(inbound);
        if satisfied < required {
          debug!(
            to = %self.graph[next].id,
            satisfied,
            required,
            "barrier not yet met"
          );
          continue;
        }
      }

      tasks.push(TaskRef::from(&self.graph[next]));
    }

    sort_task_refs(&mut tasks);
    debug!(next = ?tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), "next tasks resolved");
    Ok(tasks)
  }

  fn criteria_context(&self, context: Option<&Map<String, Value>>) -> Value {
    let mut merged = context.cloned().unwrap_or_default();
    let states: Map<String, Value> = self
      .graph
      .node_weights()
      .map(|t| {
        let state = t.state.map_or(Value::Null, |s| Value::from(s.as_str()));
        (t.id.clone(), state)
      })
      .collect();
    merged.insert(TASK_STATES_KEY.to_string(), Value::Object(states));
    Value::Object(merged)
  }

  /// Evaluate every criterion; the transition fires iff all are truthy.
  fn criteria_met(&self, criteria: &[Value], context: &Value) -> Result<bool, GraphError> {
    let evaluated = criteria
      .iter()
      .map(|criterion| dispatch::evaluate(&self.evaluators, criterion, context))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(evaluated.iter().all(is_truthy))
  }

  /// (satisfied, total) inbound transitions of a task.
  fn inbound_counts(&self, idx: NodeIndex) -> (usize, usize) {
    self
      .graph
      .edges_directed(idx, Direction::Incoming)
      .fold((0, 0), |(satisfied, total), e| {
        (satisfied + usize::from(e.weight().satisfied), total + 1)
      })
  }

  // ---------------------------------------------------------------------------
  // Barriers
  // ---------------------------------------------------------------------------

  pub fn set_barrier(&mut self, task_id: &str, barrier: Option<Barrier>) -> Result<(), GraphError> {
    let idx = self.node(task_id)?;
    self.graph[idx].barrier = barrier;
    Ok(())
  }

  pub fn get_barrier(&self, task_id: &str) -> Result<Option<Barrier>, GraphError> {
    Ok(self.graph[self.node(task_id)?].barrier)
  }

  pub fn has_barrier(&self, task_id: &str) -> Result<bool, GraphError> {
    Ok(self.get_barrier(task_id)?.is_some())
  }

  // ---------------------------------------------------------------------------
  // Transitions
  // ---------------------------------------------------------------------------

  /// Transitions between the pair whose criteria equal `criteria`.
  pub fn has_transition(&self, source: &str, destination: &str, criteria: &[Value]) -> Vec<Transition> {
    self
      .pair_edges(source, destination)
      .into_iter()
      .filter(|e| self.graph[*e].criteria == criteria)
      .map(|e| self.graph[e].clone())
      .collect()
  }

  /// The single transition between the pair matching `criteria` or `key`.
  pub fn get_transition(
    &self,
    source: &str,
    destination: &str,
    key: Option<usize>,
    criteria: Option<&[Value]>,
  ) -> Result<Transition, GraphError> {
    let edge = self.find_transition(source, destination, key, criteria)?;
    Ok(self.graph[edge].clone())
  }

  /// All transitions in insertion order.
  pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
    self.graph.edge_weights()
  }

  pub fn transition_count(&self) -> usize {
    self.graph.edge_count()
  }

  /// Add a transition, creating missing endpoints.
  ///
  /// An existing transition with the same criteria is updated in place.
  /// Returns the transition's key.
  pub fn add_transition(
    &mut self,
    source: &str,
    destination: &str,
    criteria: Vec<Value>,
  ) -> Result<usize, GraphError> {
    for task_id in [source, destination] {
      if !self.has_task(task_id) {
        self.add_task(task_id, Map::new())?;
      }
    }

    let matches: Vec<EdgeIndex> = self
      .pair_edges(source, destination)
      .into_iter()
      .filter(|e| self.graph[*e].criteria == criteria)
      .collect();

    match matches.as_slice() {
      [] => {
        let key = self.next_key(source, destination);
        let (from, to) = (self.index[source], self.index[destination]);
        self
          .graph
          .add_edge(from, to, Transition::new(source, destination, key, criteria));
        debug!(from = %source, to = %destination, key, "transition added");
        Ok(key)
      }
      [edge] => {
        let transition = &mut self.graph[*edge];
        transition.criteria = criteria;
        Ok(transition.key)
      }
      _ => Err(GraphError::AmbiguousTransition {
        from: source.to_string(),
        to: destination.to_string(),
      }),
    }
  }

  /// Merge `attrs` into the transition identified by `key`.
  pub fn update_transition(
    &mut self,
    source: &str,
    destination: &str,
    key: usize,
    attrs: Map<String, Value>,
  ) -> Result<(), GraphError> {
    let edge = self.find_transition(source, destination, Some(key), None)?;
    self.graph[edge].merge(attrs)
  }

  /// Outgoing transitions, ordered by destination id.
  pub fn get_next_transitions(&self, task_id: &str) -> Result<Vec<Transition>, GraphError> {
    let idx = self.node(task_id)?;
    Ok(
      self
        .sorted_edges(idx, Direction::Outgoing)
        .into_iter()
        .map(|e| self.graph[e].clone())
        .collect(),
    )
  }

  /// Inbound transitions, ordered by source id.
  pub fn get_prev_transitions(&self, task_id: &str) -> Result<Vec<Transition>, GraphError> {
    let idx = self.node(task_id)?;
    Ok(
      self
        .sorted_edges(idx, Direction::Incoming)
        .into_iter()
        .map(|e| self.graph[e].clone())
        .collect(),
    )
  }

  /// Every simple cycle containing the task, each starting at it.
  pub fn in_cycle(&self, task_id: &str) -> Result<Vec<Vec<String>>, GraphError> {
    let idx = self.node(task_id)?;
    let mut cycles: Vec<Vec<String>> = cycles_through(&self.graph, idx)
      .into_iter()
      .map(|cycle| cycle.into_iter().map(|n| self.graph[n].id.clone()).collect())
      .collect();
    cycles.sort();
    Ok(cycles)
  }

  // ---------------------------------------------------------------------------
  // Expressions
  // ---------------------------------------------------------------------------

  /// Validate the expressions in every task's attributes and every
  /// transition's criteria, collecting all problems.
  pub fn validate_expressions(&self) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for task in self.graph.node_weights() {
      issues.extend(dispatch::validate(
        &self.evaluators,
        &Value::Object(task.attributes.clone()),
      ));
    }
    for transition in self.graph.edge_weights() {
      issues.extend(dispatch::validate(
        &self.evaluators,
        &Value::Array(transition.criteria.clone()),
      ));
    }
    issues
  }

  /// Variables referenced by any transition criteria.
  pub fn extract_criteria_vars(&self) -> Vec<VariableRef> {
    let criteria: Vec<Value> = self
      .graph
      .edge_weights()
      .flat_map(|t| t.criteria.iter().cloned())
      .collect();
    dispatch::extract_vars(&self.evaluators, &Value::Array(criteria))
  }

  // ---------------------------------------------------------------------------
  // Internals
  // ---------------------------------------------------------------------------

  fn node(&self, task_id: &str) -> Result<NodeIndex, GraphError> {
    self
      .index
      .get(task_id)
      .copied()
      .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))
  }

  fn pair_edges(&self, source: &str, destination: &str) -> Vec<EdgeIndex> {
    let (Some(from), Some(to)) = (self.index.get(source), self.index.get(destination)) else {
      return Vec::new();
    };
    self
      .graph
      .edges_connecting(*from, *to)
      .map(|e| e.id())
      .collect()
  }

  fn find_transition(
    &self,
    source: &str,
    destination: &str,
    key: Option<usize>,
    criteria: Option<&[Value]>,
  ) -> Result<EdgeIndex, GraphError> {
    let matches: Vec<EdgeIndex> = self
      .pair_edges(source, destination)
      .into_iter()
      .filter(|e| {
        let t = &self.graph[*e];
        criteria.is_some_and(|c| t.criteria == c) || key == Some(t.key)
      })
      .collect();

    match matches.as_slice() {
      [edge] => Ok(*edge),
      [] => Err(GraphError::TransitionNotFound {
        from: source.to_string(),
        to: destination.to_string(),
      }),
      _ => Err(GraphError::AmbiguousTransition {
        from: source.to_string(),
        to: destination.to_string(),
      }),
    }
  }

  /// Smallest key not yet used between the pair.
  fn next_key(&self, source: &str, destination: &str) -> usize {
    let used: Vec<usize> = self
      .pair_edges(source, destination)
      .into_iter()
      .map(|e| self.graph[e].key)
      .collect();
    (0..).find(|k| !used.contains(k)).unwrap_or(used.len())
  }

  /// Edges of a node ordered by the neighbouring task id, then key.
  fn sorted_edges(&self, idx: NodeIndex, direction: Direction) -> Vec<EdgeIndex> {
    let mut edges: Vec<(&str, usize, EdgeIndex)> = self
      .graph
      .edges_directed(idx, direction)
      .map(|e| {
        let t = e.weight();
        let neighbour = match direction {
          Direction::Outgoing => t.destination.as_str(),
          Direction::Incoming => t.source.as_str(),
        };
        (neighbour, t.key, e.id())
      })
      .collect();
    edges.sort();
    edges.into_iter().map(|(_, _, e)| e).collect()
  }
}
