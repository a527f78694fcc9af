mod build;
mod cache;
mod graph;
mod plan;

pub use build::{BuildOptions, cmd_build};
pub use cache::{cmd_cache_list, cmd_cache_prune, cmd_cache_stats};
pub use graph::cmd_graph;
pub use plan::cmd_plan;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use strata_lib::fingerprint;
use strata_lib::graph::BuildGraph;
use strata_lib::manifest::Manifest;
use strata_lib::paths;
use strata_lib::scheduler::ForceRebuild;

/// Load the manifest, build its graph and fingerprint every node.
pub(crate) fn load_graph(file: &Path) -> Result<(Manifest, BuildGraph)> {
  let manifest = Manifest::load(file).with_context(|| format!("Failed to load manifest: {}", file.display()))?;

  let mut graph = BuildGraph::from_decls(manifest.nodes.iter().cloned()).context("Invalid build graph")?;
  fingerprint::annotate(&mut graph).context("Failed to fingerprint nodes")?;

  debug!(nodes = graph.len(), manifest = %file.display(), "graph ready");
  Ok((manifest, graph))
}

/// Cache directory for commands that may run without a manifest.
pub(crate) fn cache_dir_for(file: &Path, flag: Option<PathBuf>) -> Result<PathBuf> {
  if let Some(dir) = flag {
    return Ok(dir);
  }
  if file.exists() {
    let manifest =
      Manifest::load(file).with_context(|| format!("Failed to load manifest: {}", file.display()))?;
    return Ok(manifest.cache_dir());
  }
  Ok(paths::cache_dir_override().unwrap_or_else(paths::default_cache_dir))
}

/// `--no-cache` wins over `--force-rebuild`.
pub(crate) fn force_from_flags(force_rebuild: Option<&str>, no_cache: bool) -> ForceRebuild {
  if no_cache {
    return ForceRebuild::All;
  }
  force_rebuild.map(ForceRebuild::from_list).unwrap_or_default()
}
