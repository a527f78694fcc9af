//! Build graph: nodes, base edges and layered build stages.
//!
//! Edges point from a base to its dependent. Every node has at most one base,
//! so each connected component is a tree rooted at a runtime layer, but a
//! base may be shared by any number of dependents.

mod export;

pub use export::{ExportEdge, ExportNode, GraphExport};

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::node::{BuildNode, NodeDecl};

/// A set of node ids that may build concurrently, sorted by id.
pub type Stage = BTreeSet<String>;

/// Errors raised while constructing or ordering a graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
  /// The graph is not acyclic. Lists the nodes that could not be ordered.
  #[error("cycle detected in build graph involving: {}", .involving.join(", "))]
  CycleDetected { involving: Vec<String> },

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("unknown node: {0}")]
  UnknownNode(String),

  /// A dependent already has a different base.
  #[error("node {node} already has base {existing}, refusing second base {requested}")]
  BaseConflict {
    node: String,
    existing: String,
    requested: String,
  },
}

/// A DAG of build nodes.
#[derive(Debug, Default, Clone)]
pub struct BuildGraph {
  graph: DiGraph<BuildNode, ()>,
  indices: HashMap<String, NodeIndex>,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a graph from declarations.
  ///
  /// All nodes are added first, then every declared base becomes an edge, so
  /// declarations may appear in any order. Fails if the result has a cycle.
  pub fn from_decls(decls: impl IntoIterator<Item = NodeDecl>) -> Result<Self, GraphError> {
    let mut graph = Self::new();
    let mut bases = Vec::new();

    for decl in decls {
      if let Some(base) = &decl.base {
        bases.push((base.clone(), decl.id.clone()));
      }
      graph.add_node(decl)?;
    }

    for (base, dependent) in bases {
      graph.add_edge(&base, &dependent)?;
    }

    graph.verify_acyclic()?;
    Ok(graph)
  }

  /// Add a node.
  ///
  /// The declaration's `base` is not applied here; base relations are added
  /// with [`BuildGraph::add_edge`] once both ends exist.
  pub fn add_node(&mut self, decl: NodeDecl) -> Result<(), GraphError> {
    if self.indices.contains_key(&decl.id) {
      return Err(GraphError::DuplicateNode(decl.id));
    }

    let mut node = BuildNode::from(decl);
    node.base = None;
    let id = node.id.clone();
    let idx = self.graph.add_node(node);
    self.indices.insert(id, idx);
    Ok(())
  }

  /// Add a `base -> dependent` edge.
  ///
  /// Re-adding the same edge is a no-op. A second, different base for the
  /// same dependent fails with [`GraphError::BaseConflict`]. An edge that
  /// would close a cycle fails with [`GraphError::CycleDetected`] and leaves
  /// the graph unchanged.
  pub fn add_edge(&mut self, base: &str, dependent: &str) -> Result<(), GraphError> {
    let base_idx = self.index(base)?;
    let dependent_idx = self.index(dependent)?;

    if let Some(mut involving) = self.base_chain_reaches(base, dependent) {
      involving.sort();
      return Err(GraphError::CycleDetected { involving });
    }

    let node = &mut self.graph[dependent_idx];
    match &node.base {
      Some(existing) if existing == base => return Ok(()),
      Some(existing) => {
        return Err(GraphError::BaseConflict {
          node: dependent.to_string(),
          existing: existing.clone(),
          requested: base.to_string(),
        });
      }
      None => node.base = Some(base.to_string()),
    }

    self.graph.add_edge(base_idx, dependent_idx, ());
    Ok(())
  }

  /// Follow bases upward from `start`. Returns the visited ids if the chain
  /// reaches `target`.
  fn base_chain_reaches(&self, start: &str, target: &str) -> Option<Vec<String>> {
    let mut visited = Vec::new();
    let mut current = Some(start.to_string());

    while let Some(id) = current {
      if visited.contains(&id) {
        return None;
      }
      visited.push(id.clone());
      if id == target {
        return Some(visited);
      }
      current = self.indices.get(&id).and_then(|&idx| self.graph[idx].base.clone());
    }
    None
  }

  /// Verify that the graph is acyclic.
  pub fn verify_acyclic(&self) -> Result<(), GraphError> {
    self.build_order().map(|_| ())
  }

  /// Group nodes into stages by longest-path depth from a root.
  ///
  /// Every dependency of a node in stage *i* lies in a stage < *i*. Kahn's
  /// algorithm, processed level by level.
  pub fn build_order(&self) -> Result<Vec<Stage>, GraphError> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut stages = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();

      if ready.is_empty() {
        let mut involving: Vec<String> = remaining.iter().map(|&idx| self.graph[idx].id.clone()).collect();
        involving.sort();
        return Err(GraphError::CycleDetected { involving });
      }

      let mut stage = Stage::new();
      for idx in ready {
        remaining.remove(&idx);
        stage.insert(self.graph[idx].id.clone());

        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      stages.push(stage);
    }

    Ok(stages)
  }

  /// All nodes, in insertion order.
  pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
    self.graph.node_weights()
  }

  /// All `(base, dependent)` edges.
  pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
    self.graph.raw_edges().iter().map(|edge| {
      (
        self.graph[edge.source()].id.as_str(),
        self.graph[edge.target()].id.as_str(),
      )
    })
  }

  pub fn node(&self, id: &str) -> Option<&BuildNode> {
    self.indices.get(id).map(|&idx| &self.graph[idx])
  }

  pub fn contains(&self, id: &str) -> bool {
    self.indices.contains_key(id)
  }

  /// The base node of `id`, if it has one.
  pub fn base(&self, id: &str) -> Option<&BuildNode> {
    self.node(id)?.base.as_deref().and_then(|base| self.node(base))
  }

  /// Ancestors of `id`: its base only, or the whole base chain when
  /// `recursive`. Sorted by id.
  pub fn dependencies(&self, id: &str, recursive: bool) -> Result<Vec<String>, GraphError> {
    self.walk(id, Direction::Incoming, recursive)
  }

  /// Descendants of `id`: direct dependents, or all transitive dependents
  /// when `recursive`. Sorted by id.
  pub fn dependents(&self, id: &str, recursive: bool) -> Result<Vec<String>, GraphError> {
    self.walk(id, Direction::Outgoing, recursive)
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub(crate) fn set_fingerprint(
    &mut self,
    id: &str,
    fingerprint: Fingerprint,
    base_fingerprint: Option<Fingerprint>,
  ) -> Result<(), GraphError> {
    let idx = self.index(id)?;
    let node = &mut self.graph[idx];
    node.fingerprint = Some(fingerprint);
    node.base_fingerprint = base_fingerprint;
    Ok(())
  }

  fn index(&self, id: &str) -> Result<NodeIndex, GraphError> {
    self
      .indices
      .get(id)
      .copied()
      .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
  }

  fn walk(&self, id: &str, direction: Direction, recursive: bool) -> Result<Vec<String>, GraphError> {
    let start = self.index(id)?;
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut stack = vec![start];

    while let Some(idx) = stack.pop() {
      for next in self.graph.neighbors_directed(idx, direction) {
        if seen.insert(self.graph[next].id.clone()) && recursive {
          stack.push(next);
        }
      }
    }

    Ok(seen.into_iter().collect())
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::node::NodeKind;

  /// `mpi -> framework -> {project1, project2}`
  pub(crate) fn layered_decls() -> Vec<NodeDecl> {
    vec![
      NodeDecl::new("mpi", NodeKind::Runtime, "mpi.def"),
      NodeDecl::new("framework", NodeKind::Framework, "fw.def").with_base("mpi"),
      NodeDecl::new("project1", NodeKind::Project, "p1.def").with_base("framework"),
      NodeDecl::new("project2", NodeKind::Project, "p2.def").with_base("framework"),
    ]
  }

  fn stage(ids: &[&str]) -> Stage {
    ids.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn empty_graph() {
    let graph = BuildGraph::new();
    assert!(graph.is_empty());
    assert!(graph.build_order().unwrap().is_empty());
  }

  #[test]
  fn layered_build_order() {
    let graph = BuildGraph::from_decls(layered_decls()).unwrap();
    assert_eq!(graph.len(), 4);
    assert_eq!(
      graph.build_order().unwrap(),
      vec![stage(&["mpi"]), stage(&["framework"]), stage(&["project1", "project2"])]
    );
  }

  #[test]
  fn declaration_order_does_not_matter() {
    let mut decls = layered_decls();
    decls.reverse();
    let graph = BuildGraph::from_decls(decls).unwrap();
    assert_eq!(graph.build_order().unwrap().len(), 3);
  }

  #[test]
  fn unrelated_roots_share_a_stage() {
    let mut decls = layered_decls();
    decls.push(NodeDecl::new("other", NodeKind::Runtime, "other.def"));
    decls.push(NodeDecl::new("other-fw", NodeKind::Framework, "ofw.def").with_base("other"));
    let graph = BuildGraph::from_decls(decls).unwrap();

    let order = graph.build_order().unwrap();
    assert_eq!(order[0], stage(&["mpi", "other"]));
    assert_eq!(order[1], stage(&["framework", "other-fw"]));
  }

  #[test]
  fn build_order_never_precedes_dependencies() {
    let mut decls = layered_decls();
    decls.push(NodeDecl::new("deep", NodeKind::Project, "d.def").with_base("project1"));
    decls.push(NodeDecl::new("root2", NodeKind::Runtime, "r.def"));
    let graph = BuildGraph::from_decls(decls).unwrap();

    let order = graph.build_order().unwrap();
    let stage_of = |id: &str| order.iter().position(|s| s.contains(id)).unwrap();
    for (base, dependent) in graph.edges() {
      assert!(stage_of(base) < stage_of(dependent), "{base} must precede {dependent}");
    }
  }

  #[test]
  fn cycle_is_rejected() {
    let mut graph = BuildGraph::new();
    graph.add_node(NodeDecl::new("a", NodeKind::Framework, "a.def")).unwrap();
    graph.add_node(NodeDecl::new("b", NodeKind::Framework, "b.def")).unwrap();
    graph.add_edge("a", "b").unwrap();

    let err = graph.add_edge("b", "a").unwrap_err();
    assert_eq!(
      err,
      GraphError::CycleDetected {
        involving: vec!["a".to_string(), "b".to_string()]
      }
    );
    assert!(graph.dependencies("a", false).unwrap().is_empty());
    assert_eq!(graph.edges().count(), 1);
    assert_eq!(graph.build_order().unwrap().len(), 2);
  }

  #[test]
  fn edge_closing_a_longer_cycle_is_rejected() {
    let mut graph = BuildGraph::new();
    for id in ["a", "b", "c"] {
      graph.add_node(NodeDecl::new(id, NodeKind::Framework, "x.def")).unwrap();
    }
    graph.add_edge("a", "b").unwrap();
    graph.add_edge("b", "c").unwrap();

    assert!(matches!(
      graph.add_edge("c", "a"),
      Err(GraphError::CycleDetected { ref involving }) if involving.len() == 3
    ));
    assert!(graph.build_order().is_ok());
  }

  #[test]
  fn cycle_in_decls_fails_construction() {
    let decls = vec![
      NodeDecl::new("a", NodeKind::Framework, "a.def").with_base("b"),
      NodeDecl::new("b", NodeKind::Framework, "b.def").with_base("a"),
    ];
    assert!(matches!(
      BuildGraph::from_decls(decls),
      Err(GraphError::CycleDetected { .. })
    ));
  }

  #[test]
  fn self_edge_is_a_cycle() {
    let mut graph = BuildGraph::new();
    graph.add_node(NodeDecl::new("a", NodeKind::Runtime, "a.def")).unwrap();
    assert!(matches!(graph.add_edge("a", "a"), Err(GraphError::CycleDetected { .. })));
  }

  #[test]
  fn duplicate_and_unknown_nodes() {
    let mut graph = BuildGraph::new();
    graph.add_node(NodeDecl::new("a", NodeKind::Runtime, "a.def")).unwrap();
    assert_eq!(
      graph.add_node(NodeDecl::new("a", NodeKind::Runtime, "a.def")),
      Err(GraphError::DuplicateNode("a".to_string()))
    );
    assert_eq!(
      graph.add_edge("missing", "a"),
      Err(GraphError::UnknownNode("missing".to_string()))
    );
  }

  #[test]
  fn second_base_conflicts() {
    let mut graph = BuildGraph::from_decls(layered_decls()).unwrap();
    graph.add_node(NodeDecl::new("other", NodeKind::Runtime, "o.def")).unwrap();

    // Same base again is fine
    graph.add_edge("mpi", "framework").unwrap();
    assert_eq!(graph.edges().count(), 3);

    let err = graph.add_edge("other", "framework").unwrap_err();
    assert!(matches!(err, GraphError::BaseConflict { .. }));
  }

  #[test]
  fn dependency_queries() {
    let graph = BuildGraph::from_decls(layered_decls()).unwrap();

    assert_eq!(graph.dependencies("project1", false).unwrap(), vec!["framework"]);
    assert_eq!(graph.dependencies("project1", true).unwrap(), vec!["framework", "mpi"]);
    assert!(graph.dependencies("mpi", true).unwrap().is_empty());

    assert_eq!(graph.dependents("mpi", false).unwrap(), vec!["framework"]);
    assert_eq!(
      graph.dependents("mpi", true).unwrap(),
      vec!["framework", "project1", "project2"]
    );
    assert!(graph.dependents("project2", true).unwrap().is_empty());

    assert_eq!(graph.base("framework").map(|n| n.id.as_str()), Some("mpi"));
    assert!(graph.base("mpi").is_none());
    assert!(graph.dependents("nope", true).is_err());
  }
}
