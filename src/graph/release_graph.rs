//! Ecosystem dependency graph and release leveling
//!
//! ## Graph Structure
//!
//! - **Directed Graph**: `A → B` means "A depends on B"
//! - **Nodes**: ecosystem project names
//! - **Edges**: manifest requirements whose identity matches another project;
//!   requirements on anything outside the ecosystem are dropped
//!
//! Levels come from layer peeling: level 0 holds projects without ecosystem
//! dependencies, level k holds projects whose dependencies all sit in levels
//! below k. Names inside a level are sorted.

use crate::core::error::{GraphError, RelayResult};
use crate::project::ProjectDescriptor;
use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};

pub struct ReleaseGraph {
  graph: DiGraph<String, ()>,
  name_to_node: HashMap<String, NodeIndex>,
}

impl ReleaseGraph {
  /// Build the graph from discovered projects
  pub fn build(projects: &[ProjectDescriptor]) -> Self {
    let by_identity: HashMap<&str, &str> = projects
      .iter()
      .map(|p| (p.identity.as_str(), p.name.as_str()))
      .collect();

    let mut edges = Vec::new();
    for project in projects {
      for dep in &project.dependencies {
        if let Some(target) = by_identity.get(dep.identity.as_str()) {
          edges.push((project.name.as_str(), *target));
        }
      }
    }

    Self::from_edges(projects.iter().map(|p| p.name.as_str()), edges)
  }

  /// Build from names and (dependent, dependency) pairs
  ///
  /// Pairs naming an unknown project are dropped.
  pub fn from_edges<'a>(
    names: impl IntoIterator<Item = &'a str>,
    edges: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Self {
    let mut graph = DiGraph::new();
    let mut name_to_node = HashMap::new();
    for name in names {
      if !name_to_node.contains_key(name) {
        let idx = graph.add_node(name.to_string());
        name_to_node.insert(name.to_string(), idx);
      }
    }
    for (from, to) in edges {
      if let (Some(&a), Some(&b)) = (name_to_node.get(from), name_to_node.get(to)) {
        graph.update_edge(a, b, ());
      }
    }
    Self { graph, name_to_node }
  }

  /// Release levels, or [`GraphError::Cycle`] naming every member of every cycle
  pub fn levels(&self) -> RelayResult<Vec<Vec<String>>> {
    let mut remaining: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Outgoing).count()))
      .collect();

    let mut levels = Vec::new();
    loop {
      let mut ready: Vec<NodeIndex> = remaining
        .iter()
        .filter(|(_, deps)| **deps == 0)
        .map(|(idx, _)| *idx)
        .collect();
      if ready.is_empty() {
        break;
      }
      ready.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

      for idx in &ready {
        remaining.remove(idx);
      }
      for idx in &ready {
        for dependent in self.graph.neighbors_directed(*idx, Direction::Incoming) {
          if let Some(count) = remaining.get_mut(&dependent) {
            *count -= 1;
          }
        }
      }
      levels.push(ready.into_iter().map(|idx| self.graph[idx].clone()).collect());
    }

    if !remaining.is_empty() {
      return Err(GraphError::Cycle {
        members: self.cycle_members(),
      }
      .into());
    }
    Ok(levels)
  }

  /// Every project on a dependency cycle, sorted
  ///
  /// Uses Tarjan's SCC; a component counts when it has more than one member
  /// or a self-loop.
  pub fn cycle_members(&self) -> Vec<String> {
    let mut members = BTreeSet::new();
    for component in algo::tarjan_scc(&self.graph) {
      let is_cycle = component.len() > 1 || self.graph.contains_edge(component[0], component[0]);
      if is_cycle {
        members.extend(component.into_iter().map(|idx| self.graph[idx].clone()));
      }
    }
    members.into_iter().collect()
  }

  /// Projects `name` depends on directly
  pub fn direct_dependencies(&self, name: &str) -> RelayResult<Vec<String>> {
    Ok(self.neighbors(self.find_node(name)?, Direction::Outgoing))
  }

  /// Projects that depend on `name` directly
  pub fn direct_dependents(&self, name: &str) -> RelayResult<Vec<String>> {
    Ok(self.neighbors(self.find_node(name)?, Direction::Incoming))
  }

  /// Every project that depends on `name`, directly or through others
  pub fn transitive_dependents(&self, name: &str) -> RelayResult<Vec<String>> {
    let start = self.find_node(name)?;

    let mut visited = HashSet::new();
    let mut stack = vec![start];
    let mut dependents = BTreeSet::new();

    while let Some(idx) = stack.pop() {
      if !visited.insert(idx) {
        continue;
      }
      for neighbor in self.graph.neighbors_directed(idx, Direction::Incoming) {
        if neighbor != start {
          dependents.insert(self.graph[neighbor].clone());
        }
        stack.push(neighbor);
      }
    }

    Ok(dependents.into_iter().collect())
  }

  fn neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<String> {
    let mut names: Vec<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    names.sort();
    names.dedup();
    names
  }

  fn find_node(&self, name: &str) -> RelayResult<NodeIndex> {
    self
      .name_to_node
      .get(name)
      .copied()
      .ok_or_else(|| GraphError::UnknownProject { name: name.to_string() }.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::error::RelayError;
  use proptest::prelude::*;

  fn level_of(levels: &[Vec<String>], name: &str) -> usize {
    levels.iter().position(|l| l.iter().any(|n| n == name)).unwrap()
  }

  #[test]
  fn test_two_level_chain() {
    let graph = ReleaseGraph::from_edges(["app-b", "lib-a"], [("app-b", "lib-a")]);
    assert_eq!(
      graph.levels().unwrap(),
      vec![vec!["lib-a".to_string()], vec!["app-b".to_string()]]
    );
  }

  #[test]
  fn test_independent_projects_share_level() {
    let graph = ReleaseGraph::from_edges(
      ["c", "b", "a", "top"],
      [("top", "a"), ("top", "b"), ("top", "c")],
    );
    let levels = graph.levels().unwrap();
    assert_eq!(levels[0], vec!["a", "b", "c"]);
    assert_eq!(levels[1], vec!["top"]);
  }

  #[test]
  fn test_diamond_levels() {
    let graph = ReleaseGraph::from_edges(
      ["base", "left", "right", "app"],
      [("left", "base"), ("right", "base"), ("app", "left"), ("app", "right"), ("app", "base")],
    );
    let levels = graph.levels().unwrap();
    assert_eq!(levels.len(), 3);
    assert_eq!(levels[1], vec!["left", "right"]);
  }

  #[test]
  fn test_unknown_edges_dropped() {
    let graph = ReleaseGraph::from_edges(["a"], [("a", "github.com/external/x")]);
    assert_eq!(graph.levels().unwrap(), vec![vec!["a".to_string()]]);
  }

  #[test]
  fn test_cycle_names_only_members() {
    let graph = ReleaseGraph::from_edges(
      ["a", "b", "c", "victim", "free"],
      [("a", "b"), ("b", "c"), ("c", "a"), ("victim", "a")],
    );
    match graph.levels().unwrap_err() {
      RelayError::Graph(GraphError::Cycle { members }) => assert_eq!(members, vec!["a", "b", "c"]),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn test_self_loop_is_cycle() {
    let graph = ReleaseGraph::from_edges(["solo"], [("solo", "solo")]);
    match graph.levels().unwrap_err() {
      RelayError::Graph(GraphError::Cycle { members }) => assert_eq!(members, vec!["solo"]),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn test_dependents() {
    let graph = ReleaseGraph::from_edges(
      ["lib", "mid", "app", "other"],
      [("mid", "lib"), ("app", "mid"), ("other", "app")],
    );
    assert_eq!(graph.direct_dependents("lib").unwrap(), vec!["mid"]);
    assert_eq!(graph.direct_dependencies("app").unwrap(), vec!["mid"]);
    assert_eq!(graph.transitive_dependents("lib").unwrap(), vec!["app", "mid", "other"]);
    assert!(graph.transitive_dependents("other").unwrap().is_empty());
    assert!(graph.direct_dependents("missing").is_err());
  }

  proptest! {
    #[test]
    fn prop_levels_respect_every_edge(
      n in 1usize..24,
      raw_edges in prop::collection::vec((0usize..24, 0usize..24), 0..80),
    ) {
      let names: Vec<String> = (0..n).map(|i| format!("p{i:02}")).collect();
      // Edges only point from higher to lower index, so the graph is acyclic
      let edges: Vec<(&str, &str)> = raw_edges
        .iter()
        .filter(|(a, b)| a < &n && b < &n && a > b)
        .map(|(a, b)| (names[*a].as_str(), names[*b].as_str()))
        .collect();
      let graph = ReleaseGraph::from_edges(names.iter().map(String::as_str), edges.iter().copied());
      let levels = graph.levels().unwrap();

      let total: usize = levels.iter().map(Vec::len).sum();
      prop_assert_eq!(total, n);
      for (dependent, dependency) in &edges {
        prop_assert!(level_of(&levels, dependency) < level_of(&levels, dependent));
      }
    }

    #[test]
    fn prop_ring_reports_all_members(k in 2usize..12) {
      let names: Vec<String> = (0..k).map(|i| format!("r{i:02}")).collect();
      let edges: Vec<(&str, &str)> = (0..k).map(|i| (names[i].as_str(), names[(i + 1) % k].as_str())).collect();
      let graph = ReleaseGraph::from_edges(names.iter().map(String::as_str), edges);
      match graph.levels() {
        Err(RelayError::Graph(GraphError::Cycle { members })) => prop_assert_eq!(members, names),
        other => prop_assert!(false, "expected cycle, got {:?}", other.map(|_| ())),
      }
    }
  }
}
