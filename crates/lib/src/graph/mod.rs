//! Dependency graph over deployment units.
//!
//! One node per generated unit, with an edge from every unit a component reads
//! remote state from to the unit that reads it. The graph must be acyclic;
//! [`DependencyGraph::waves`] groups nodes into levels that can run
//! concurrently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::generate::{GenerateError, Generator};

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("dependency cycle between {}", nodes.join(", "))]
  Cycle { nodes: Vec<String> },

  #[error("duplicate graph node '{0}'")]
  DuplicateNode(String),

  #[error("unknown graph node '{0}'")]
  UnknownNode(String),

  #[error(transparent)]
  Generate(#[from] GenerateError),
}

/// A deployment unit and the directory it was generated into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
  pub key: String,
  pub site: String,
  pub path: PathBuf,
}

/// Directed graph of deployment units, edges pointing from dependency to dependent.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
  graph: DiGraph<GraphNode, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build the graph for the units in `locations`.
  ///
  /// References to units outside `locations` are ignored, so a partial
  /// selection runs without its already deployed dependencies.
  pub fn from_config(generator: &Generator<'_>, locations: &BTreeMap<String, PathBuf>) -> Result<Self, GraphError> {
    let mut dag = Self::new();

    for site in &generator.cfg.sites {
      for unit in site.units() {
        if let Some(path) = locations.get(&unit.key) {
          dag.add_node(GraphNode {
            key: unit.key,
            site: site.identifier.clone(),
            path: path.clone(),
          })?;
        }
      }
    }

    let resolver = generator.resolver();
    for site in &generator.cfg.sites {
      for component in &site.components {
        let dependent = site.unit_key_for(component);
        if !dag.contains(&dependent) {
          continue;
        }
        for dependency in resolver.referenced_units(site, component)? {
          if dag.contains(&dependency) {
            dag.add_dependency(&dependent, &dependency)?;
          }
        }
      }
    }

    dag.verify_acyclic()?;
    debug!(nodes = dag.len(), edges = dag.graph.edge_count(), "dependency graph built");
    Ok(dag)
  }

  pub fn add_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
    if self.nodes.contains_key(&node.key) {
      return Err(GraphError::DuplicateNode(node.key));
    }
    let key = node.key.clone();
    let idx = self.graph.add_node(node);
    self.nodes.insert(key, idx);
    Ok(())
  }

  /// Record that `dependent` must run after `dependency`.
  pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<(), GraphError> {
    let to = self.index(dependent)?;
    let from = self.index(dependency)?;
    self.graph.update_edge(from, to, ());
    Ok(())
  }

  /// Fail with the members of every strongly connected component larger than one node.
  pub fn verify_acyclic(&self) -> Result<(), GraphError> {
    let mut nodes: Vec<String> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
      .flatten()
      .map(|idx| self.graph[idx].key.clone())
      .collect();

    if nodes.is_empty() {
      return Ok(());
    }
    nodes.sort();
    Err(GraphError::Cycle { nodes })
  }

  /// Group nodes into levels; every node's dependencies are in earlier levels.
  ///
  /// Keys within a wave are sorted.
  pub fn waves(&self) -> Result<Vec<Vec<String>>, GraphError> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|idx| in_degree[idx] == 0).copied().collect();
      if ready.is_empty() {
        let mut nodes: Vec<String> = remaining.iter().map(|idx| self.graph[*idx].key.clone()).collect();
        nodes.sort();
        return Err(GraphError::Cycle { nodes });
      }

      for idx in &ready {
        remaining.remove(idx);
        for dependent in self.graph.neighbors_directed(*idx, Direction::Outgoing) {
          if let Some(degree) = in_degree.get_mut(&dependent) {
            *degree = degree.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<String> = ready.into_iter().map(|idx| self.graph[idx].key.clone()).collect();
      wave.sort();
      waves.push(wave);
    }

    Ok(waves)
  }

  /// Direct dependencies of a node, sorted by key.
  pub fn dependencies(&self, key: &str) -> Vec<&str> {
    let Some(&idx) = self.nodes.get(key) else {
      return Vec::new();
    };
    let mut deps: Vec<&str> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| self.graph[dep].key.as_str())
      .collect();
    deps.sort();
    deps
  }

  /// The same nodes with every edge reversed, for tearing down dependents first.
  pub fn reversed(&self) -> Self {
    let mut graph = self.graph.clone();
    graph.reverse();
    Self {
      graph,
      nodes: self.nodes.clone(),
    }
  }

  pub fn node(&self, key: &str) -> Option<&GraphNode> {
    self.nodes.get(key).map(|idx| &self.graph[*idx])
  }

  pub fn contains(&self, key: &str) -> bool {
    self.nodes.contains_key(key)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
    self.graph.node_weights()
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  fn index(&self, key: &str) -> Result<NodeIndex, GraphError> {
    self
      .nodes
      .get(key)
      .copied()
      .ok_or_else(|| GraphError::UnknownNode(key.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;
  use crate::generate::file_locations;
  use crate::util::testutil::{SAMPLE_CONFIG, config_from, sample_config, test_registry};

  fn node(key: &str) -> GraphNode {
    GraphNode {
      key: key.to_string(),
      site: key.split('/').next().unwrap_or(key).to_string(),
      path: PathBuf::from("/out").join(key),
    }
  }

  fn graph(keys: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
    let mut dag = DependencyGraph::new();
    for key in keys {
      dag.add_node(node(key)).unwrap();
    }
    for (dependent, dependency) in edges {
      dag.add_dependency(dependent, dependency).unwrap();
    }
    dag
  }

  #[test]
  fn empty_graph() {
    let dag = DependencyGraph::new();
    assert!(dag.is_empty());
    assert!(dag.waves().unwrap().is_empty());
  }

  #[test]
  fn linear_chain() {
    // c depends on b, b depends on a
    let dag = graph(&["a", "b", "c"], &[("b", "a"), ("c", "b")]);
    assert_eq!(dag.waves().unwrap(), vec![vec!["a"], vec!["b"], vec!["c"]]);
    assert_eq!(dag.dependencies("c"), vec!["b"]);
    assert!(dag.dependencies("a").is_empty());
  }

  #[test]
  fn diamond() {
    let dag = graph(
      &["d", "c", "b", "a"],
      &[("b", "a"), ("c", "a"), ("d", "b"), ("d", "c")],
    );
    assert_eq!(dag.waves().unwrap(), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    assert_eq!(dag.dependencies("d"), vec!["b", "c"]);
  }

  #[test]
  fn independent_nodes_share_a_wave() {
    let dag = graph(&["z", "y", "x"], &[]);
    assert_eq!(dag.waves().unwrap(), vec![vec!["x", "y", "z"]]);
  }

  #[test]
  fn duplicate_edges_are_merged() {
    let dag = graph(&["a", "b"], &[("b", "a"), ("b", "a")]);
    assert_eq!(dag.dependencies("b"), vec!["a"]);
  }

  #[test]
  fn unknown_and_duplicate_nodes() {
    let mut dag = graph(&["a"], &[]);
    assert!(matches!(dag.add_node(node("a")), Err(GraphError::DuplicateNode(k)) if k == "a"));
    assert!(matches!(dag.add_dependency("a", "missing"), Err(GraphError::UnknownNode(k)) if k == "missing"));
  }

  #[test]
  fn cycle_is_reported_with_members() {
    let dag = graph(&["a", "b", "c"], &[("a", "b"), ("b", "a"), ("c", "a")]);
    match dag.verify_acyclic() {
      Err(GraphError::Cycle { nodes }) => assert_eq!(nodes, vec!["a", "b"]),
      other => panic!("expected cycle, got {other:?}"),
    }
    assert!(matches!(dag.waves(), Err(GraphError::Cycle { .. })));
  }

  #[test]
  fn reversed_runs_dependents_first() {
    let dag = graph(&["a", "b", "c"], &[("b", "a"), ("c", "b")]).reversed();
    assert_eq!(dag.waves().unwrap(), vec![vec!["c"], vec!["b"], vec!["a"]]);
  }

  #[test]
  fn from_sample_config() {
    let (cfg, plugins) = sample_config();
    let generator = Generator::new(&cfg, &plugins, Path::new("/out")).unwrap();
    let locations = file_locations(&cfg, Path::new("/out"));
    let dag = DependencyGraph::from_config(&generator, &locations).unwrap();

    assert_eq!(dag.len(), 3);
    assert_eq!(dag.dependencies("eu/worker"), vec!["eu"]);
    assert_eq!(dag.dependencies("us"), vec!["eu"]);
    assert_eq!(dag.waves().unwrap(), vec![vec!["eu"], vec!["eu/worker", "us"]]);

    let worker = dag.node("eu/worker").unwrap();
    assert_eq!(worker.site, "eu");
    assert_eq!(worker.path, Path::new("/out/main/eu/worker"));
  }

  #[test]
  fn selection_ignores_outside_dependencies() {
    let (cfg, plugins) = sample_config();
    let generator = Generator::new(&cfg, &plugins, Path::new("/out")).unwrap();
    let locations: BTreeMap<String, PathBuf> = file_locations(&cfg, Path::new("/out"))
      .into_iter()
      .filter(|(key, _)| key == "us")
      .collect();
    let dag = DependencyGraph::from_config(&generator, &locations).unwrap();

    assert_eq!(dag.len(), 1);
    assert!(dag.dependencies("us").is_empty());
  }

  #[test]
  fn cross_site_cycle_is_rejected() {
    let yaml = SAMPLE_CONFIG.replace(
      "          subnet_vpc: ${component.network.vpc_id}\n",
      "          subnet_vpc: ${component.network.vpc_id}\n          peer: ${site.us.api.url}\n",
    );
    let mut plugins = test_registry();
    let cfg = config_from(&yaml, Path::new("/configs"), &mut plugins);
    let generator = Generator::new(&cfg, &plugins, Path::new("/out")).unwrap();
    let locations = file_locations(&cfg, Path::new("/out"));

    match DependencyGraph::from_config(&generator, &locations) {
      Err(GraphError::Cycle { nodes }) => assert_eq!(nodes, vec!["eu", "us"]),
      other => panic!("expected cycle, got {other:?}"),
    }
  }
}
