use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::builder::CommandBuilder;
use crate::node::{NodeDecl, NodeKind};

/// Engine settings from the `engine:` section. Unset keys fall back to
/// environment variables, then built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
  pub max_workers: Option<usize>,
  pub timeout: Option<Duration>,
  /// Resolved against the manifest directory.
  pub cache_dir: Option<PathBuf>,
  /// Resolved against the manifest directory.
  pub artifact_dir: Option<PathBuf>,
}

/// External build program from the `builder:` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
  pub program: String,
  pub args: Vec<String>,
  pub extension: String,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      program: "apptainer".to_string(),
      args: CommandBuilder::default_args(),
      extension: "sif".to_string(),
    }
  }
}

impl BuilderConfig {
  /// Build a [`CommandBuilder`] that runs from `working_dir`.
  pub fn command_builder(&self, artifact_dir: &Path, working_dir: &Path) -> CommandBuilder {
    CommandBuilder::new(&self.program, self.args.clone(), artifact_dir)
      .with_extension(&self.extension)
      .with_working_dir(working_dir)
  }
}

/// A loaded, validated manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
  /// Directory relative paths were resolved against.
  pub root: PathBuf,
  pub engine: EngineConfig,
  pub builder: BuilderConfig,
  /// Node declarations after matrix expansion, in declaration order.
  pub nodes: Vec<NodeDecl>,
}

// Raw YAML shapes.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawManifest {
  #[serde(default)]
  pub engine: RawEngine,
  #[serde(default)]
  pub builder: RawBuilder,
  #[serde(default)]
  pub nodes: Vec<RawNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawEngine {
  pub max_workers: Option<usize>,
  pub timeout: Option<String>,
  pub cache_dir: Option<PathBuf>,
  pub artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawBuilder {
  pub program: Option<String>,
  pub args: Option<Vec<String>>,
  pub extension: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawNode {
  pub id: String,
  pub kind: NodeKind,
  pub definition: PathBuf,
  #[serde(default)]
  pub base: Option<String>,
  #[serde(default)]
  pub parameters: BTreeMap<String, serde_yaml::Value>,
  #[serde(default)]
  pub matrix: BTreeMap<String, Vec<serde_yaml::Value>>,
}
