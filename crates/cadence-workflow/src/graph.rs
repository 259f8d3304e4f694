use std::collections::{HashMap, HashSet, VecDeque};

use crate::node::WorkflowNode;

/// Routing structure of a workflow, for reachability analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: node_id -> every node id it can route to.
  adjacency: HashMap<String, Vec<String>>,
  /// Nodes reachable from the start node.
  reachable: HashSet<String>,
}

impl Graph {
  /// Build a graph from indexed nodes, starting at `start_node`.
  pub fn new(nodes: &HashMap<String, WorkflowNode>, start_node: &str) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for (node_id, node) in nodes {
      let targets = adjacency.entry(node_id.clone()).or_default();
      targets.extend(node.references().into_iter().map(str::to_string));
    }

    let mut reachable = HashSet::new();
    let mut queue = VecDeque::from([start_node.to_string()]);
    while let Some(node_id) = queue.pop_front() {
      if !reachable.insert(node_id.clone()) {
        continue;
      }
      if let Some(targets) = adjacency.get(&node_id) {
        queue.extend(targets.iter().cloned());
      }
    }

    Self {
      adjacency,
      reachable,
    }
  }

  /// Get the node ids a node can route to.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check whether a node can be reached from the start node.
  pub fn is_reachable(&self, node_id: &str) -> bool {
    self.reachable.contains(node_id)
  }

  /// Nodes that can never execute, sorted by id.
  pub fn unreachable(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self
      .adjacency
      .keys()
      .filter(|id| !self.reachable.contains(*id))
      .map(String::as_str)
      .collect();
    ids.sort_unstable();
    ids
  }
}
