use serde_json::{Map, Value, json};
use trellis_graph::{Barrier, GraphError, State, TaskRef, WorkflowGraph};

fn ids(tasks: &[TaskRef]) -> Vec<&str> {
  tasks.iter().map(|t| t.id.as_str()).collect()
}

fn finish(graph: &mut WorkflowGraph, task_id: &str, state: State) {
  graph.update_task_state(task_id, State::Running).unwrap();
  graph.update_task_state(task_id, state).unwrap();
}

fn diamond() -> WorkflowGraph {
  let mut graph = WorkflowGraph::new();
  graph.add_transition("A", "B", vec![]).unwrap();
  graph.add_transition("A", "C", vec![]).unwrap();
  graph.add_transition("B", "D", vec![]).unwrap();
  graph.add_transition("C", "D", vec![]).unwrap();
  graph.set_barrier("D", Some(Barrier::All)).unwrap();
  graph
}

#[test]
fn test_diamond_join() {
  let mut graph = diamond();
  assert_eq!(ids(&graph.get_start_tasks()), vec!["A"]);

  finish(&mut graph, "A", State::Succeeded);
  assert_eq!(ids(&graph.get_next_tasks("A", None).unwrap()), vec!["B", "C"]);

  finish(&mut graph, "B", State::Succeeded);
  assert!(graph.get_next_tasks("B", None).unwrap().is_empty());

  finish(&mut graph, "C", State::Succeeded);
  assert_eq!(ids(&graph.get_next_tasks("C", None).unwrap()), vec!["D"]);
}

#[test]
fn test_diamond_survives_round_trip_mid_run() {
  let mut graph = diamond();
  finish(&mut graph, "A", State::Succeeded);
  graph.get_next_tasks("A", None).unwrap();
  finish(&mut graph, "B", State::Succeeded);
  graph.get_next_tasks("B", None).unwrap();

  let mut restored = WorkflowGraph::from_json(graph.to_json().unwrap()).unwrap();
  finish(&mut restored, "C", State::Succeeded);
  assert_eq!(ids(&restored.get_next_tasks("C", None).unwrap()), vec!["D"]);
}

#[test]
fn test_conditional_branching_on_context() {
  let mut graph = WorkflowGraph::new();
  graph
    .add_transition("check", "approve", vec![json!("{{ _.score >= 80 }}")])
    .unwrap();
  graph
    .add_transition("check", "review", vec![json!("{{ _.score < 80 }}")])
    .unwrap();
  graph
    .add_transition(
      "check",
      "escalate",
      vec![json!("{{ _.__task_states.check == 'failed' }}")],
    )
    .unwrap();

  finish(&mut graph, "check", State::Succeeded);
  let context: Map<String, Value> = json!({"score": 42}).as_object().cloned().unwrap();
  assert_eq!(
    ids(&graph.get_next_tasks("check", Some(&context)).unwrap()),
    vec!["review"]
  );
}

#[test]
fn test_failure_path() {
  let mut graph = WorkflowGraph::new();
  graph
    .add_transition("work", "cleanup", vec![json!("{{ _.__task_states.work == 'failed' }}")])
    .unwrap();
  graph
    .add_transition("work", "report", vec![json!("{{ _.__task_states.work == 'succeeded' }}")])
    .unwrap();

  finish(&mut graph, "work", State::Failed);
  assert_eq!(ids(&graph.get_next_tasks("work", None).unwrap()), vec!["cleanup"]);
}

#[test]
fn test_loop_reentry_with_reset() {
  let mut graph = WorkflowGraph::new();
  graph.add_transition("poll", "wait", vec![json!("{{ not _.ready }}")]).unwrap();
  graph.add_transition("wait", "poll", vec![]).unwrap();
  graph.add_transition("poll", "done", vec![json!("{{ _.ready }}")]).unwrap();

  assert_eq!(graph.in_cycle("poll").unwrap(), vec![vec!["poll", "wait"]]);

  let not_ready = json!({"ready": false}).as_object().cloned().unwrap();
  finish(&mut graph, "poll", State::Succeeded);
  assert_eq!(ids(&graph.get_next_tasks("poll", Some(&not_ready)).unwrap()), vec!["wait"]);

  finish(&mut graph, "wait", State::Succeeded);
  assert_eq!(ids(&graph.get_next_tasks("wait", None).unwrap()), vec!["poll"]);

  // A completed task cannot run again until it is reset.
  assert!(matches!(
    graph.update_task_state("poll", State::Running),
    Err(GraphError::InvalidStateTransition { .. })
  ));
  graph.reset_task("poll").unwrap();

  let ready = json!({"ready": true}).as_object().cloned().unwrap();
  finish(&mut graph, "poll", State::Succeeded);
  assert_eq!(ids(&graph.get_next_tasks("poll", Some(&ready)).unwrap()), vec!["done"]);
}

#[test]
fn test_task_states_snapshot() {
  let mut graph = diamond();
  finish(&mut graph, "A", State::Succeeded);
  graph.update_task_state("B", State::Running).unwrap();

  let states = graph.get_task_states();
  assert_eq!(states["A"], Some(State::Succeeded));
  assert_eq!(states["B"], Some(State::Running));
  assert_eq!(states["C"], None);
  assert_eq!(states.len(), 4);
}
