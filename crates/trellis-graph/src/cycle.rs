//! Simple cycle enumeration.

use std::collections::BTreeSet;

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

/// Every simple cycle through `start`, each listed beginning at `start`.
///
/// Parallel edges are collapsed, so each cycle appears once. The search only
/// walks the strongly connected component containing `start`.
pub(crate) fn cycles_through<N, E>(graph: &DiGraph<N, E>, start: NodeIndex) -> Vec<Vec<NodeIndex>> {
  let Some(component) = tarjan_scc(graph)
    .into_iter()
    .find(|component| component.contains(&start))
  else {
    return Vec::new();
  };
  let component: BTreeSet<NodeIndex> = component.into_iter().collect();

  let mut cycles = Vec::new();
  let mut path = vec![start];
  let mut on_path = BTreeSet::from([start]);
  walk(graph, &component, start, start, &mut path, &mut on_path, &mut cycles);
  cycles
}

fn walk<N, E>(
  graph: &DiGraph<N, E>,
  component: &BTreeSet<NodeIndex>,
  start: NodeIndex,
  node: NodeIndex,
  path: &mut Vec<NodeIndex>,
  on_path: &mut BTreeSet<NodeIndex>,
  cycles: &mut Vec<Vec<NodeIndex>>,
) {
  let successors: BTreeSet<NodeIndex> = graph
    .neighbors_directed(node, Direction::Outgoing)
    .filter(|next| component.contains(next))
    .collect();

  for next in successors {
    if next == start {
      cycles.push(path.clone());
    } else if on_path.insert(next) {
      path.push(next);
      walk(graph, component, start, next, path, on_path, cycles);
      path.pop();
      on_path.remove(&next);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn graph(edges: &[(u32, u32)]) -> DiGraph<(), ()> {
    DiGraph::from_edges(edges)
  }

  fn sorted(cycles: Vec<Vec<NodeIndex>>) -> Vec<Vec<usize>> {
    let mut out: Vec<Vec<usize>> = cycles
      .into_iter()
      .map(|c| c.into_iter().map(|n| n.index()).collect())
      .collect();
    out.sort();
    out
  }

  #[test]
  fn test_acyclic() {
    let g = graph(&[(0, 1), (1, 2)]);
    assert!(cycles_through(&g, NodeIndex::new(1)).is_empty());
  }

  #[test]
  fn test_self_loop() {
    let g = graph(&[(0, 0), (0, 1)]);
    assert_eq!(sorted(cycles_through(&g, NodeIndex::new(0))), vec![vec![0]]);
  }

  #[test]
  fn test_two_cycles_through_node() {
    // 0 -> 1 -> 0 and 0 -> 2 -> 3 -> 0, plus a cycle 4 <-> 5 elsewhere.
    let g = graph(&[(0, 1), (1, 0), (0, 2), (2, 3), (3, 0), (4, 5), (5, 4)]);
    assert_eq!(
      sorted(cycles_through(&g, NodeIndex::new(0))),
      vec![vec![0, 1], vec![0, 2, 3]]
    );
    assert_eq!(cycles_through(&g, NodeIndex::new(4)).len(), 1);
  }

  #[test]
  fn test_parallel_edges_collapse() {
    let g = graph(&[(0, 1), (0, 1), (1, 0)]);
    assert_eq!(sorted(cycles_through(&g, NodeIndex::new(1))), vec![vec![1, 0]]);
  }
}
