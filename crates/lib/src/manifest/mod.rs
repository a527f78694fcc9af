//! Manifest loading and validation.
//!
//! A manifest (`strata.yaml`) declares engine settings, the external build
//! program and the list of nodes. Loading resolves relative paths against the
//! manifest's directory, expands build matrices into concrete nodes and
//! rejects anything the graph could not be built from.
//!
//! # Format
//!
//! ```yaml
//! engine:
//!   max_workers: 4
//!   timeout: 2h
//! nodes:
//!   - id: openmpi
//!     kind: runtime
//!     definition: basic/openmpi.def
//!     parameters: { OS_VERSION: "24.04" }
//!   - id: test
//!     kind: project
//!     base: openmpi
//!     definition: projects/test.def
//!     matrix: { branch: [master, dev] }
//! ```

mod types;

pub use types::*;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::node::NodeDecl;
use crate::node::matrix::BuildMatrix;
use crate::paths;

/// Errors raised while loading a manifest. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read manifest {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("invalid node id '{0}': ids must be non-empty and use only letters, digits, '.', '_' or '-'")]
  InvalidId(String),

  #[error("duplicate node id '{0}'")]
  DuplicateId(String),

  #[error("node '{node}' has unknown base '{base}'")]
  UnknownBase { node: String, base: String },

  #[error("node '{0}' names itself as its base")]
  SelfBase(String),

  #[error("definition for node '{node}' does not exist: {}", path.display())]
  MissingDefinition { node: String, path: PathBuf },

  #[error("matrix axis '{axis}' of node '{node}' has no values")]
  EmptyMatrixAxis { node: String, axis: String },

  #[error("matrix axis '{axis}' of node '{node}' collides with a parameter of the same name")]
  MatrixParameterCollision { node: String, axis: String },

  #[error("value of '{key}' on node '{node}' must be a string, number or boolean")]
  InvalidParameter { node: String, key: String },

  #[error("invalid timeout '{value}': {message}")]
  InvalidTimeout { value: String, message: String },

  #[error("max_workers must be at least 1")]
  InvalidMaxWorkers,
}

impl Manifest {
  /// Read and validate the manifest at `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let root = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    let root = std::path::absolute(&root).unwrap_or(root);
    debug!(path = %path.display(), "loading manifest");
    Self::parse(&content, &root)
  }

  /// Parse manifest `content`, resolving relative paths against `root`.
  pub fn parse(content: &str, root: &Path) -> Result<Self, ConfigError> {
    let raw: RawManifest = serde_yaml::from_str(content)?;

    let engine = parse_engine(raw.engine, root)?;
    let builder = parse_builder(raw.builder);

    let mut nodes = Vec::new();
    for node in raw.nodes {
      nodes.extend(expand_node(node, root)?);
    }
    validate(&nodes)?;

    debug!(nodes = nodes.len(), "manifest loaded");
    Ok(Self {
      root: root.to_path_buf(),
      engine,
      builder,
      nodes,
    })
  }

  /// Cache directory: `STRATA_CACHE_DIR`, then the manifest, then the
  /// platform default.
  pub fn cache_dir(&self) -> PathBuf {
    paths::cache_dir_override()
      .or_else(|| self.engine.cache_dir.clone())
      .unwrap_or_else(paths::default_cache_dir)
  }

  /// Artifact directory: `STRATA_ARTIFACT_DIR`, then the manifest, then
  /// `artifacts/` next to the manifest.
  pub fn artifact_dir(&self) -> PathBuf {
    paths::artifact_dir_override()
      .or_else(|| self.engine.artifact_dir.clone())
      .unwrap_or_else(|| self.root.join("artifacts"))
  }
}

fn parse_engine(raw: RawEngine, root: &Path) -> Result<EngineConfig, ConfigError> {
  if raw.max_workers == Some(0) {
    return Err(ConfigError::InvalidMaxWorkers);
  }

  let timeout = match raw.timeout {
    Some(value) => Some(
      humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidTimeout {
        message: e.to_string(),
        value,
      })?,
    ),
    None => None,
  };

  Ok(EngineConfig {
    max_workers: raw.max_workers,
    timeout,
    cache_dir: raw.cache_dir.map(|p| resolve(root, &p)),
    artifact_dir: raw.artifact_dir.map(|p| resolve(root, &p)),
  })
}

fn parse_builder(raw: RawBuilder) -> BuilderConfig {
  let defaults = BuilderConfig::default();
  BuilderConfig {
    program: raw.program.unwrap_or(defaults.program),
    args: raw.args.unwrap_or(defaults.args),
    extension: raw.extension.unwrap_or(defaults.extension),
  }
}

/// Turn one raw entry into one node per matrix combination.
fn expand_node(raw: RawNode, root: &Path) -> Result<Vec<NodeDecl>, ConfigError> {
  let definition = resolve(root, &raw.definition);
  if !definition.exists() {
    return Err(ConfigError::MissingDefinition {
      node: raw.id,
      path: definition,
    });
  }

  let mut parameters = BTreeMap::new();
  for (key, value) in &raw.parameters {
    let value = scalar_string(value).ok_or_else(|| ConfigError::InvalidParameter {
      node: raw.id.clone(),
      key: key.clone(),
    })?;
    parameters.insert(key.clone(), value);
  }

  let mut axes = BTreeMap::new();
  for (axis, values) in &raw.matrix {
    if values.is_empty() {
      return Err(ConfigError::EmptyMatrixAxis {
        node: raw.id.clone(),
        axis: axis.clone(),
      });
    }
    if parameters.contains_key(axis) {
      return Err(ConfigError::MatrixParameterCollision {
        node: raw.id.clone(),
        axis: axis.clone(),
      });
    }
    let values = values
      .iter()
      .map(|v| {
        scalar_string(v).ok_or_else(|| ConfigError::InvalidParameter {
          node: raw.id.clone(),
          key: axis.clone(),
        })
      })
      .collect::<Result<Vec<_>, _>>()?;
    axes.insert(axis.clone(), values);
  }

  let matrix = BuildMatrix::new(axes);
  let variants = matrix.variants();
  if variants.len() > 1 {
    debug!(node = %raw.id, variants = variants.len(), "expanding matrix");
  }

  Ok(
    variants
      .into_iter()
      .map(|variant| {
        let mut decl = NodeDecl::new(variant.node_id(&raw.id), raw.kind, definition.clone());
        decl.parameters = parameters.clone();
        decl.parameters.extend(variant.values);
        decl.base = raw.base.clone();
        decl
      })
      .collect(),
  )
}

fn validate(nodes: &[NodeDecl]) -> Result<(), ConfigError> {
  let mut seen = HashSet::with_capacity(nodes.len());
  for node in nodes {
    if !is_valid_id(&node.id) {
      return Err(ConfigError::InvalidId(node.id.clone()));
    }
    if !seen.insert(node.id.as_str()) {
      return Err(ConfigError::DuplicateId(node.id.clone()));
    }
  }

  for node in nodes {
    let Some(base) = &node.base else {
      continue;
    };
    if base == &node.id {
      return Err(ConfigError::SelfBase(node.id.clone()));
    }
    if !seen.contains(base.as_str()) {
      return Err(ConfigError::UnknownBase {
        node: node.id.clone(),
        base: base.clone(),
      });
    }
  }

  Ok(())
}

fn is_valid_id(id: &str) -> bool {
  !id.is_empty()
    && id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Strings pass through; numbers and booleans use their YAML spelling.
fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
  match value {
    serde_yaml::Value::String(s) => Some(s.clone()),
    serde_yaml::Value::Number(n) => Some(n.to_string()),
    serde_yaml::Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    root.join(path)
  }
}
