use serde::Serialize;

use crate::node::NodeKind;

use super::{BuildGraph, GraphError};

/// A node as seen by a visualizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportNode {
  pub id: String,
  pub kind: NodeKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEdge {
  pub from: String,
  pub to: String,
}

/// Everything a renderer needs: nodes, edges and stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphExport {
  pub nodes: Vec<ExportNode>,
  pub edges: Vec<ExportEdge>,
  pub stages: Vec<Vec<String>>,
}

impl GraphExport {
  /// Snapshot `graph`. Nodes and edges are sorted for stable output.
  pub fn from_graph(graph: &BuildGraph) -> Result<Self, GraphError> {
    let stages = graph
      .build_order()?
      .into_iter()
      .map(|stage| stage.into_iter().collect())
      .collect();

    let mut nodes: Vec<ExportNode> = graph
      .nodes()
      .map(|node| ExportNode {
        id: node.id.clone(),
        kind: node.kind,
        fingerprint: node.fingerprint.as_ref().map(ToString::to_string),
      })
      .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut edges: Vec<ExportEdge> = graph
      .edges()
      .map(|(from, to)| ExportEdge {
        from: from.to_string(),
        to: to.to_string(),
      })
      .collect();
    edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

    Ok(Self { nodes, edges, stages })
  }
}
