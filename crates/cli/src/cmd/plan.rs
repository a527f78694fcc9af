//! Implementation of the `strata plan` command.
//!
//! Shows build stages and which nodes would be rebuilt, without invoking the
//! builder or writing to the cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use strata_lib::cache::BuildCache;
use strata_lib::scheduler::{BuildPlan, ForceRebuild, Scheduler, SchedulerConfig};

use super::{force_from_flags, load_graph};
use crate::output::{OutputFormat, print_info, print_json, print_stat, symbols};

pub fn cmd_plan(
  file: &Path,
  force_rebuild: Option<&str>,
  no_cache: bool,
  cache_dir: Option<PathBuf>,
  output: OutputFormat,
) -> Result<()> {
  let (manifest, graph) = load_graph(file)?;
  let cache_dir = cache_dir.unwrap_or_else(|| manifest.cache_dir());

  let config = SchedulerConfig {
    force: force_from_flags(force_rebuild, no_cache),
    ..Default::default()
  };
  let builder = manifest.builder.command_builder(&manifest.artifact_dir(), &manifest.root);
  let scheduler = Scheduler::new(builder, Arc::new(BuildCache::open(&cache_dir)), config);

  let plan = scheduler.plan(&graph).context("Failed to plan build")?;
  print_plan(&plan, &scheduler.config().force, output)
}

pub(crate) fn print_plan(plan: &BuildPlan, force: &ForceRebuild, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    return print_json(plan);
  }

  for (i, stage) in plan.stages.iter().enumerate() {
    println!("Stage {}: [{}]", i, stage.join(", "));
    for node in plan.nodes.iter().filter(|n| n.stage == i) {
      let symbol = if node.fresh {
        symbols::CACHED.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string()
      } else {
        symbols::BUILD.if_supports_color(Stream::Stdout, |s| s.green()).to_string()
      };
      let reason = match (node.fresh, node.forced) {
        (true, _) => "cached",
        (false, true) => "forced",
        (false, false) => "stale",
      };
      let base = node
        .base
        .as_ref()
        .map(|b| format!(" ({} {})", symbols::ARROW, b))
        .unwrap_or_default();
      println!(
        "  {} {}{} {} {}",
        symbol,
        node.id,
        base,
        node.fingerprint.short().if_supports_color(Stream::Stdout, |s| s.dimmed()),
        reason
      );
    }
  }

  println!();
  if *force != ForceRebuild::None {
    print_info("Forced nodes and their dependents are rebuilt regardless of the cache");
  }
  print_stat("To build", &plan.to_build().count().to_string());
  print_stat("Cached", &plan.cached().count().to_string());
  Ok(())
}
