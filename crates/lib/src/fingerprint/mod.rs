//! Content fingerprints for build nodes.
//!
//! A fingerprint is the SHA-256 of a canonical JSON encoding of:
//! - the node kind
//! - its parameters, sorted by key
//! - the digest of its definition content (file bytes, or a directory tree)
//! - its base node's fingerprint, if any
//!
//! Because the base fingerprint is part of the encoding, fingerprints must be
//! computed top-down, and any change to an ancestor changes every descendant.
//! There is no separate invalidation pass.
//!
//! The node id is deliberately not encoded: two nodes with byte-identical
//! declared and inherited content share a fingerprint.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::consts::FINGERPRINT_FORMAT;
use crate::graph::{BuildGraph, GraphError};
use crate::node::{BuildNode, NodeKind};

/// A full 64-character lowercase hex SHA-256 digest identifying a node's content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
  /// Parse a fingerprint from its hex form.
  ///
  /// Returns `None` unless the input is exactly 64 lowercase hex characters.
  pub fn from_hex(hex: &str) -> Option<Self> {
    let valid = hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    valid.then(|| Self(hex.to_string()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// First 12 characters, for display.
  pub fn short(&self) -> &str {
    &self.0[..12]
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Errors that can occur while fingerprinting.
#[derive(Debug, Error)]
pub enum FingerprintError {
  /// The definition content could not be read.
  #[error("failed to read definition {}: {message}", path.display())]
  ReadDefinition { path: PathBuf, message: String },

  /// A node's base has no fingerprint yet.
  #[error("base {base} of node {node} has not been fingerprinted")]
  MissingBase { node: String, base: String },

  /// The canonical encoding could not be produced.
  #[error("failed to encode node {node}: {source}")]
  Encode {
    node: String,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Canonical encoding of a node. Field order is alphabetical so the JSON is
/// stable without relying on map ordering.
#[derive(Serialize)]
struct CanonicalNode<'a> {
  base: Option<&'a str>,
  definition: &'a str,
  format: u32,
  kind: NodeKind,
  parameters: &'a BTreeMap<String, String>,
}

/// Compute the fingerprint of `node` given its base's fingerprint.
///
/// `base` must be `Some` exactly when the node has a base.
pub fn compute(node: &BuildNode, base: Option<&Fingerprint>) -> Result<Fingerprint, FingerprintError> {
  if let Some(base_id) = &node.base
    && base.is_none()
  {
    return Err(FingerprintError::MissingBase {
      node: node.id.clone(),
      base: base_id.clone(),
    });
  }

  let definition = definition_digest(&node.definition)?;
  let canonical = CanonicalNode {
    base: base.map(Fingerprint::as_str),
    definition: &definition,
    format: FINGERPRINT_FORMAT,
    kind: node.kind,
    parameters: &node.parameters,
  };

  let encoded = serde_json::to_vec(&canonical).map_err(|source| FingerprintError::Encode {
    node: node.id.clone(),
    source,
  })?;

  Ok(Fingerprint(hash_bytes(&encoded)))
}

/// Fingerprint every node of `graph`, stage by stage.
///
/// Nodes in stage *i* only ever read fingerprints from stages < *i*, so a
/// single pass in build order is enough.
pub fn annotate(graph: &mut BuildGraph) -> Result<(), FingerprintError> {
  let stages = graph.build_order()?;

  for (stage_idx, stage) in stages.iter().enumerate() {
    for id in stage {
      let (fingerprint, base_fp) = {
        let node = graph.node(id).ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
        let base_fp = graph.base(id).and_then(|b| b.fingerprint.clone());
        (compute(node, base_fp.as_ref())?, base_fp)
      };

      debug!(node = %id, stage = stage_idx, fingerprint = %fingerprint.short(), "fingerprinted node");
      graph.set_fingerprint(id, fingerprint, base_fp)?;
    }
  }

  Ok(())
}

/// Digest of a definition: file bytes for a file, a deterministic tree
/// hash for a directory.
pub fn definition_digest(path: &Path) -> Result<String, FingerprintError> {
  let metadata = fs::metadata(path).map_err(|e| read_error(path, e))?;
  if metadata.is_dir() {
    hash_directory(path)
  } else {
    hash_file(path)
  }
}

/// Compute a deterministic hash of a directory's contents.
///
/// Covers relative paths, file contents and symlink targets, not metadata.
/// Entries are sorted by path.
pub fn hash_directory(path: &Path) -> Result<String, FingerprintError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| FingerprintError::ReadDefinition {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    // Skip the root directory itself
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      format!("F:{}:{}", rel_path, hash_file(entry_path)?)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| read_error(entry_path, e))?;
      format!("L:{}:{}", rel_path, hash_bytes(target.to_string_lossy().as_bytes()))
    } else {
      continue;
    };

    entries.push((rel_path, line));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, line) in entries {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(format!("{:x}", hasher.finalize()))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<String, FingerprintError> {
  let mut file = fs::File::open(path).map_err(|e| read_error(path, e))?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| read_error(path, e))?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(format!("{:x}", hasher.finalize()))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  format!("{:x}", hasher.finalize())
}

fn read_error(path: &Path, e: std::io::Error) -> FingerprintError {
  FingerprintError::ReadDefinition {
    path: path.to_path_buf(),
    message: e.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::NodeDecl;
  use std::fs;
  use tempfile::TempDir;

  struct Fixture {
    dir: TempDir,
  }

  impl Fixture {
    fn new() -> Self {
      Self {
        dir: TempDir::new().unwrap(),
      }
    }

    fn def(&self, name: &str, content: &str) -> PathBuf {
      let path = self.dir.path().join(name);
      fs::write(&path, content).unwrap();
      path
    }
  }

  /// mpi -> framework -> {project1, project2}, plus an unrelated root.
  fn layered_graph(fx: &Fixture, framework_param: &str) -> BuildGraph {
    let decls = vec![
      NodeDecl::new("mpi", NodeKind::Runtime, fx.def("mpi.def", "mpi")),
      NodeDecl::new("framework", NodeKind::Framework, fx.def("fw.def", "fw"))
        .with_base("mpi")
        .with_parameter("VERSION", framework_param),
      NodeDecl::new("project1", NodeKind::Project, fx.def("p1.def", "p1")).with_base("framework"),
      NodeDecl::new("project2", NodeKind::Project, fx.def("p2.def", "p2")).with_base("framework"),
      NodeDecl::new("other", NodeKind::Runtime, fx.def("other.def", "other")),
    ];
    let mut graph = BuildGraph::from_decls(decls).unwrap();
    annotate(&mut graph).unwrap();
    graph
  }

  fn fp(graph: &BuildGraph, id: &str) -> Fingerprint {
    graph.node(id).unwrap().fingerprint.clone().unwrap()
  }

  #[test]
  fn fingerprint_is_64_hex() {
    let fx = Fixture::new();
    let graph = layered_graph(&fx, "2406");
    let f = fp(&graph, "mpi");
    assert_eq!(f.as_str().len(), 64);
    assert!(Fingerprint::from_hex(f.as_str()).is_some());
    assert_eq!(f.short().len(), 12);
  }

  #[test]
  fn fingerprint_is_deterministic() {
    let fx = Fixture::new();
    let a = layered_graph(&fx, "2406");
    let b = layered_graph(&fx, "2406");
    for id in ["mpi", "framework", "project1", "project2", "other"] {
      assert_eq!(fp(&a, id), fp(&b, id), "fingerprint of {id} changed between runs");
    }
  }

  #[test]
  fn parameter_change_cascades_to_descendants_only() {
    let fx = Fixture::new();
    let before = layered_graph(&fx, "2406");
    let after = layered_graph(&fx, "2412");

    assert_ne!(fp(&before, "framework"), fp(&after, "framework"));
    assert_ne!(fp(&before, "project1"), fp(&after, "project1"));
    assert_ne!(fp(&before, "project2"), fp(&after, "project2"));

    assert_eq!(fp(&before, "mpi"), fp(&after, "mpi"));
    assert_eq!(fp(&before, "other"), fp(&after, "other"));
  }

  #[test]
  fn definition_content_not_path_is_hashed() {
    let fx = Fixture::new();
    let a = BuildNode::from(NodeDecl::new("a", NodeKind::Runtime, fx.def("a.def", "same")));
    let b = BuildNode::from(NodeDecl::new("b", NodeKind::Runtime, fx.def("b.def", "same")));
    assert_eq!(compute(&a, None).unwrap(), compute(&b, None).unwrap());

    fs::write(fx.dir.path().join("b.def"), "different").unwrap();
    assert_ne!(compute(&a, None).unwrap(), compute(&b, None).unwrap());
  }

  #[test]
  fn parameter_order_does_not_matter() {
    let fx = Fixture::new();
    let path = fx.def("x.def", "x");
    let a = BuildNode::from(
      NodeDecl::new("a", NodeKind::Project, &path)
        .with_parameter("A", "1")
        .with_parameter("B", "2"),
    );
    let b = BuildNode::from(
      NodeDecl::new("a", NodeKind::Project, &path)
        .with_parameter("B", "2")
        .with_parameter("A", "1"),
    );
    assert_eq!(compute(&a, None).unwrap(), compute(&b, None).unwrap());
  }

  #[test]
  fn kind_is_part_of_fingerprint() {
    let fx = Fixture::new();
    let path = fx.def("x.def", "x");
    let a = BuildNode::from(NodeDecl::new("a", NodeKind::Runtime, &path));
    let b = BuildNode::from(NodeDecl::new("a", NodeKind::Framework, &path));
    assert_ne!(compute(&a, None).unwrap(), compute(&b, None).unwrap());
  }

  #[test]
  fn missing_base_fingerprint_is_an_error() {
    let fx = Fixture::new();
    let node = BuildNode::from(NodeDecl::new("p", NodeKind::Project, fx.def("p.def", "p")).with_base("fw"));
    let err = compute(&node, None).unwrap_err();
    assert!(matches!(err, FingerprintError::MissingBase { .. }));
  }

  #[test]
  fn unreadable_definition_is_an_error() {
    let fx = Fixture::new();
    let node = BuildNode::from(NodeDecl::new(
      "p",
      NodeKind::Runtime,
      fx.dir.path().join("missing.def"),
    ));
    let err = compute(&node, None).unwrap_err();
    assert!(matches!(err, FingerprintError::ReadDefinition { .. }));
  }

  #[test]
  fn directory_definitions_hash_their_tree() {
    let fx = Fixture::new();
    let dir = fx.dir.path().join("defdir");
    fs::create_dir_all(dir.join("files")).unwrap();
    fs::write(dir.join("main.def"), "Bootstrap: docker").unwrap();
    fs::write(dir.join("files/setup.sh"), "echo hi").unwrap();

    let first = definition_digest(&dir).unwrap();
    assert_eq!(first, definition_digest(&dir).unwrap());

    fs::write(dir.join("files/setup.sh"), "echo bye").unwrap();
    assert_ne!(first, definition_digest(&dir).unwrap());
  }

  #[test]
  fn same_content_different_structure_different_hash() {
    let temp1 = TempDir::new().unwrap();
    fs::write(temp1.path().join("file.txt"), "content").unwrap();

    let temp2 = TempDir::new().unwrap();
    fs::create_dir(temp2.path().join("subdir")).unwrap();
    fs::write(temp2.path().join("subdir/file.txt"), "content").unwrap();

    assert_ne!(hash_directory(temp1.path()).unwrap(), hash_directory(temp2.path()).unwrap());
  }

  #[test]
  fn from_hex_rejects_malformed_input() {
    assert!(Fingerprint::from_hex("abc").is_none());
    assert!(Fingerprint::from_hex(&"G".repeat(64)).is_none());
    assert!(Fingerprint::from_hex(&"A".repeat(64)).is_none());
    assert!(Fingerprint::from_hex(&"a".repeat(64)).is_some());
  }
}
