//! Node-link document format.
//!
//! ```json
//! { "directed": true, "multigraph": true,
//!   "graph": { "state": "running" },
//!   "nodes": [ { "id": "a", "barrier": "*" } ],
//!   "links": [ { "source": 0, "target": 1, "key": 0, "criteria": [], "satisfied": false } ] }
//! ```
//!
//! `source` and `target` are positions in `nodes`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use trellis_expression::{EvaluatorRegistry, registry};

use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::state::State;
use crate::task::Task;
use crate::transition::Transition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLinkGraph {
  #[serde(default = "default_true")]
  pub directed: bool,
  #[serde(default = "default_true")]
  pub multigraph: bool,
  #[serde(default)]
  pub graph: GraphAttributes,
  #[serde(default)]
  pub nodes: Vec<Task>,
  #[serde(default)]
  pub links: Vec<Link>,
}

fn default_true() -> bool {
  true
}

/// Workflow-level attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphAttributes {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<State>,
  #[serde(flatten)]
  pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
  pub source: usize,
  pub target: usize,
  #[serde(default)]
  pub key: usize,
  #[serde(default)]
  pub criteria: Vec<Value>,
  #[serde(default)]
  pub satisfied: bool,
  #[serde(flatten)]
  pub attributes: Map<String, Value>,
}

impl WorkflowGraph {
  /// Snapshot the graph as a node-link document.
  pub fn serialize(&self) -> NodeLinkGraph {
    let links = self
      .graph
      .edge_indices()
      .filter_map(|edge| {
        let (source, target) = self.graph.edge_endpoints(edge)?;
        let transition = &self.graph[edge];
        Some(Link {
          source: source.index(),
          target: target.index(),
          key: transition.key,
          criteria: transition.criteria.clone(),
          satisfied: transition.satisfied,
          attributes: transition.attributes.clone(),
        })
      })
      .collect();

    NodeLinkGraph {
      directed: true,
      multigraph: true,
      graph: GraphAttributes {
        state: self.state,
        attributes: self.attributes.clone(),
      },
      nodes: self.graph.node_weights().cloned().collect(),
      links,
    }
  }

  /// Rebuild a graph from a node-link document using the process-wide
  /// evaluator registry.
  pub fn deserialize(doc: NodeLinkGraph) -> Result<Self, GraphError> {
    Self::deserialize_with_registry(doc, registry().clone())
  }

  /// Rebuild a graph from a node-link document.
  ///
  /// Stored states are taken as-is; only the document structure is checked.
  pub fn deserialize_with_registry(
    doc: NodeLinkGraph,
    evaluators: Arc<EvaluatorRegistry>,
  ) -> Result<Self, GraphError> {
    if !doc.directed {
      return Err(GraphError::InvalidDocument(
        "workflow graphs must be directed".to_string(),
      ));
    }

    let mut graph = WorkflowGraph::with_registry(evaluators);
    graph.state = doc.graph.state;
    graph.attributes = doc.graph.attributes;

    let mut nodes = Vec::with_capacity(doc.nodes.len());
    for task in doc.nodes {
      if graph.index.contains_key(&task.id) {
        return Err(GraphError::InvalidDocument(format!(
          "duplicate task id '{}'",
          task.id
        )));
      }
      let id = task.id.clone();
      let idx = graph.graph.add_node(task);
      graph.index.insert(id, idx);
      nodes.push(idx);
    }

    let mut keys: HashMap<(usize, usize), HashSet<usize>> = HashMap::new();
    for (position, link) in doc.links.into_iter().enumerate() {
      let (Some(&from), Some(&to)) = (nodes.get(link.source), nodes.get(link.target)) else {
        return Err(GraphError::InvalidDocument(format!(
          "link {} refers to a missing node ({} -> {})",
          position, link.source, link.target
        )));
      };

      if !keys
        .entry((link.source, link.target))
        .or_default()
        .insert(link.key)
      {
        return Err(GraphError::InvalidDocument(format!(
          "duplicate key {} for link {} -> {}",
          link.key, graph.graph[from].id, graph.graph[to].id
        )));
      }

      let transition = Transition {
        source: graph.graph[from].id.clone(),
        destination: graph.graph[to].id.clone(),
        key: link.key,
        criteria: link.criteria,
        satisfied: link.satisfied,
        attributes: link.attributes,
      };
      graph.graph.add_edge(from, to, transition);
    }

    debug!(
      tasks = graph.task_count(),
      transitions = graph.transition_count(),
      "graph deserialized"
    );
    Ok(graph)
  }

  pub fn to_json(&self) -> Result<Value, GraphError> {
    serde_json::to_value(self.serialize())
      .map_err(|e| GraphError::InvalidDocument(e.to_string()))
  }

  pub fn from_json(value: Value) -> Result<Self, GraphError> {
    let doc: NodeLinkGraph =
      serde_json::from_value(value).map_err(|e| GraphError::InvalidDocument(e.to_string()))?;
    Self::deserialize(doc)
  }
}
