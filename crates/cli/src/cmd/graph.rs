//! Implementation of the `strata graph` command.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use strata_lib::cache::BuildCache;
use strata_lib::graph::GraphExport;

use super::load_graph;
use crate::output::{OutputFormat, print_success};
use crate::render::{self, GraphFormat};

pub fn cmd_graph(
  file: &Path,
  format: Option<GraphFormat>,
  out: Option<PathBuf>,
  highlight_cached: bool,
  cache_dir: Option<PathBuf>,
  output: OutputFormat,
) -> Result<()> {
  let (manifest, graph) = load_graph(file)?;
  let export = GraphExport::from_graph(&graph).context("Failed to order build graph")?;

  let cached: BTreeSet<String> = if highlight_cached {
    let cache = BuildCache::open(cache_dir.unwrap_or_else(|| manifest.cache_dir()));
    graph
      .nodes()
      .filter(|node| cache.is_fresh(node))
      .map(|node| node.id.clone())
      .collect()
  } else {
    BTreeSet::new()
  };

  let format = format.unwrap_or(if output.is_json() {
    GraphFormat::Json
  } else {
    GraphFormat::Text
  });

  let rendered = match format {
    GraphFormat::Dot => render::to_dot(&export, &cached),
    GraphFormat::Mermaid => render::to_mermaid(&export, &cached),
    GraphFormat::Text => render::to_text(&export),
    GraphFormat::Json => {
      let mut json = serde_json::to_string_pretty(&export).context("Failed to serialize graph")?;
      json.push('\n');
      json
    }
  };

  match out {
    Some(path) => {
      fs::write(&path, &rendered).with_context(|| format!("Failed to write graph: {}", path.display()))?;
      print_success(&format!("Wrote {} node(s) to {}", export.nodes.len(), path.display()));
    }
    None => print!("{}", rendered),
  }

  Ok(())
}
