//! Text renderings of a [`GraphExport`]: DOT, Mermaid and a stage listing.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use clap::ValueEnum;

use strata_lib::graph::GraphExport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
  Dot,
  Mermaid,
  Text,
  Json,
}

/// Graphviz DOT. Nodes in `cached` are filled green.
pub fn to_dot(export: &GraphExport, cached: &BTreeSet<String>) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "digraph strata {{");
  let _ = writeln!(out, "  rankdir=TB;");
  let _ = writeln!(out, "  node [shape=box, style=rounded];");

  for node in &export.nodes {
    let label = format!("{}\\n{}", escape(&node.id), node.kind);
    if cached.contains(&node.id) {
      let _ = writeln!(
        out,
        "  \"{}\" [label=\"{}\", style=\"rounded,filled\", fillcolor=palegreen];",
        escape(&node.id),
        label
      );
    } else {
      let _ = writeln!(out, "  \"{}\" [label=\"{}\"];", escape(&node.id), label);
    }
  }

  for edge in &export.edges {
    let _ = writeln!(out, "  \"{}\" -> \"{}\";", escape(&edge.from), escape(&edge.to));
  }

  out.push_str("}\n");
  out
}

/// Mermaid flowchart. Node ids may contain characters Mermaid rejects, so
/// nodes are keyed `n0`, `n1`, ... and labelled with their id.
pub fn to_mermaid(export: &GraphExport, cached: &BTreeSet<String>) -> String {
  let keys: HashMap<&str, String> = export
    .nodes
    .iter()
    .enumerate()
    .map(|(i, node)| (node.id.as_str(), format!("n{}", i)))
    .collect();

  let mut out = String::from("graph TD\n");
  for node in &export.nodes {
    let _ = writeln!(out, "  {}[\"{} ({})\"]", keys[node.id.as_str()], node.id, node.kind);
  }
  for edge in &export.edges {
    if let (Some(from), Some(to)) = (keys.get(edge.from.as_str()), keys.get(edge.to.as_str())) {
      let _ = writeln!(out, "  {} --> {}", from, to);
    }
  }

  let cached_keys: Vec<&str> = export
    .nodes
    .iter()
    .filter(|n| cached.contains(&n.id))
    .map(|n| keys[n.id.as_str()].as_str())
    .collect();
  if !cached_keys.is_empty() {
    out.push_str("  classDef cached fill:#9f9,stroke:#393\n");
    let _ = writeln!(out, "  class {} cached", cached_keys.join(","));
  }

  out
}

/// `Stage i: [a, b]`, one line per stage.
pub fn to_text(export: &GraphExport) -> String {
  let mut out = String::new();
  for (i, stage) in export.stages.iter().enumerate() {
    let _ = writeln!(out, "Stage {}: [{}]", i, stage.join(", "));
  }
  out
}

fn escape(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
  use super::*;
  use strata_lib::graph::{ExportEdge, ExportNode};
  use strata_lib::node::NodeKind;

  fn export() -> GraphExport {
    GraphExport {
      nodes: vec![
        ExportNode {
          id: "framework".into(),
          kind: NodeKind::Framework,
          fingerprint: None,
        },
        ExportNode {
          id: "mpi".into(),
          kind: NodeKind::Runtime,
          fingerprint: None,
        },
        ExportNode {
          id: "project1".into(),
          kind: NodeKind::Project,
          fingerprint: None,
        },
      ],
      edges: vec![
        ExportEdge {
          from: "framework".into(),
          to: "project1".into(),
        },
        ExportEdge {
          from: "mpi".into(),
          to: "framework".into(),
        },
      ],
      stages: vec![vec!["mpi".into()], vec!["framework".into()], vec!["project1".into()]],
    }
  }

  #[test]
  fn text_lists_stages() {
    assert_eq!(
      to_text(&export()),
      "Stage 0: [mpi]\nStage 1: [framework]\nStage 2: [project1]\n"
    );
  }

  #[test]
  fn dot_has_edges_and_highlights_cached() {
    let cached = BTreeSet::from(["mpi".to_string()]);
    let dot = to_dot(&export(), &cached);

    assert!(dot.starts_with("digraph strata {"));
    assert!(dot.contains("\"mpi\" -> \"framework\";"));
    assert!(dot.contains("\"mpi\" [label=\"mpi\\nruntime\", style=\"rounded,filled\""));
    assert!(dot.contains("\"project1\" [label=\"project1\\nproject\"];"));
  }

  #[test]
  fn mermaid_uses_safe_keys() {
    let cached = BTreeSet::from(["mpi".to_string()]);
    let mermaid = to_mermaid(&export(), &cached);

    assert!(mermaid.starts_with("graph TD\n"));
    assert!(mermaid.contains("  n1[\"mpi (runtime)\"]"));
    assert!(mermaid.contains("  n1 --> n0"));
    assert!(mermaid.contains("  class n1 cached"));
  }
}
