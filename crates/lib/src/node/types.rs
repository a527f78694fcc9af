use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// The layer a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
  /// Base runtime layer (OS plus MPI stack).
  #[serde(alias = "mpi")]
  Runtime,
  /// Framework layer installed on top of a runtime.
  Framework,
  /// Project layer built on top of a framework.
  Project,
}

impl NodeKind {
  pub fn as_str(self) -> &'static str {
    match self {
      NodeKind::Runtime => "runtime",
      NodeKind::Framework => "framework",
      NodeKind::Project => "project",
    }
  }
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A node declaration as produced by a configuration front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDecl {
  pub id: String,
  pub kind: NodeKind,
  /// Declared build arguments, kept sorted by key.
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
  /// Path to the build-instruction content (file or directory).
  pub definition: PathBuf,
  /// The node this one is layered on; `None` for roots.
  #[serde(default)]
  pub base: Option<String>,
}

impl NodeDecl {
  pub fn new(id: impl Into<String>, kind: NodeKind, definition: impl Into<PathBuf>) -> Self {
    Self {
      id: id.into(),
      kind,
      parameters: BTreeMap::new(),
      definition: definition.into(),
      base: None,
    }
  }

  pub fn with_base(mut self, base: impl Into<String>) -> Self {
    self.base = Some(base.into());
    self
  }

  pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.parameters.insert(key.into(), value.into());
    self
  }
}

/// A node owned by a [`crate::graph::BuildGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNode {
  pub id: String,
  pub kind: NodeKind,
  pub parameters: BTreeMap<String, String>,
  pub definition: PathBuf,
  pub base: Option<String>,
  /// Set by [`crate::fingerprint::annotate`]; `None` until then.
  pub fingerprint: Option<Fingerprint>,
  /// The base's fingerprint at the time this node was fingerprinted.
  pub base_fingerprint: Option<Fingerprint>,
}

impl From<NodeDecl> for BuildNode {
  fn from(decl: NodeDecl) -> Self {
    Self {
      id: decl.id,
      kind: decl.kind,
      parameters: decl.parameters,
      definition: decl.definition,
      base: decl.base,
      fingerprint: None,
      base_fingerprint: None,
    }
  }
}

/// Per-node execution state.
///
/// Valid paths:
/// - `Pending -> Cached -> Built`
/// - `Pending -> Building -> Built | Failed`
/// - `Pending -> Skipped` (an ancestor failed)
/// - `Pending -> Cancelled` (stop requested before start)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
  Pending,
  Cached,
  Building,
  Built,
  Failed,
  Skipped,
  Cancelled,
}

impl NodeStatus {
  /// Whether the node can no longer change state.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      NodeStatus::Built | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Cancelled
    )
  }

  /// Whether `next` is a legal successor of `self`.
  pub fn can_transition_to(self, next: NodeStatus) -> bool {
    use NodeStatus::*;
    matches!(
      (self, next),
      (Pending, Cached | Building | Skipped | Cancelled) | (Cached, Built) | (Building, Built | Failed)
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      NodeStatus::Pending => "pending",
      NodeStatus::Cached => "cached",
      NodeStatus::Building => "building",
      NodeStatus::Built => "built",
      NodeStatus::Failed => "failed",
      NodeStatus::Skipped => "skipped",
      NodeStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for NodeStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
