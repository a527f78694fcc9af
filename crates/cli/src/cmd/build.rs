//! Implementation of the `strata build` command.
//!
//! Loads the manifest, fingerprints the graph and runs the scheduler against
//! the cache. Ctrl-C requests a cooperative stop: running builds finish,
//! everything not yet started is cancelled.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use strata_lib::cache::{BuildCache, LockMode, StoreLock};
use strata_lib::graph::GraphExport;
use strata_lib::scheduler::{RunReport, Scheduler, SchedulerConfig};

use super::plan::print_plan;
use super::{force_from_flags, load_graph};
use crate::output::{
  OutputFormat, format_duration, print_error, print_json, print_node_report, print_stat, print_success, print_warning,
};
use crate::render;

/// Exit status when the run was interrupted and nothing failed.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Default)]
pub struct BuildOptions {
  pub force_rebuild: Option<String>,
  pub no_cache: bool,
  pub jobs: Option<usize>,
  pub sequential: bool,
  pub timeout: Option<Duration>,
  pub dry_run: bool,
  pub graph_only: bool,
  pub cache_dir: Option<PathBuf>,
  pub artifact_dir: Option<PathBuf>,
}

pub fn cmd_build(file: &Path, options: BuildOptions, output: OutputFormat) -> Result<ExitCode> {
  let (manifest, graph) = load_graph(file)?;

  if options.graph_only {
    let export = GraphExport::from_graph(&graph).context("Failed to order build graph")?;
    if output.is_json() {
      print_json(&export)?;
    } else {
      print!("{}", render::to_text(&export));
    }
    return Ok(ExitCode::SUCCESS);
  }

  let cache_dir = options.cache_dir.unwrap_or_else(|| manifest.cache_dir());
  let artifact_dir = options.artifact_dir.unwrap_or_else(|| manifest.artifact_dir());

  let max_workers = if options.sequential {
    1
  } else {
    options
      .jobs
      .or(manifest.engine.max_workers)
      .unwrap_or_else(|| SchedulerConfig::default().max_workers)
  };
  let config = SchedulerConfig {
    max_workers,
    timeout: options.timeout.or(manifest.engine.timeout),
    force: force_from_flags(options.force_rebuild.as_deref(), options.no_cache),
  };

  if options.dry_run {
    let builder = manifest.builder.command_builder(&artifact_dir, &manifest.root);
    let scheduler = Scheduler::new(builder, Arc::new(BuildCache::open(&cache_dir)), config);
    let plan = scheduler.plan(&graph).context("Failed to plan build")?;
    return print_plan(&plan, &scheduler.config().force, output).map(|_| ExitCode::SUCCESS);
  }

  let _lock = StoreLock::acquire(&cache_dir, LockMode::Shared, "build").context("Failed to acquire cache lock")?;

  let builder = manifest.builder.command_builder(&artifact_dir, &manifest.root);
  let scheduler = Scheduler::new(builder, Arc::new(BuildCache::open(&cache_dir)), config);

  info!(
    manifest = %file.display(),
    cache = %cache_dir.display(),
    artifacts = %artifact_dir.display(),
    "starting build"
  );

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(async {
      let stop = scheduler.stop_handle();
      let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          warn!("interrupt received, cancelling nodes that have not started");
          stop.stop();
        }
      });

      let report = scheduler.run(&graph).await;
      interrupt.abort();
      report
    })
    .context("Build failed")?;

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report);
  }

  Ok(exit_code(&report))
}

fn print_report(report: &RunReport) {
  for node in &report.nodes {
    print_node_report(node);
  }

  println!();
  if report.has_failures() {
    print_error("Build finished with failures");
  } else if report.stopped {
    print_warning("Build interrupted");
  } else {
    print_success("Build complete!");
  }

  let summary = &report.summary;
  print_stat("Built", &summary.built.to_string());
  print_stat("Cached", &summary.cached.to_string());
  print_stat("Failed", &summary.failed.to_string());
  print_stat("Skipped", &summary.skipped.to_string());
  print_stat("Cancelled", &summary.cancelled.to_string());
  print_stat("Duration", &format_duration(report.duration));
}

fn exit_code(report: &RunReport) -> ExitCode {
  if report.has_failures() {
    ExitCode::FAILURE
  } else if report.stopped || report.summary.cancelled > 0 {
    ExitCode::from(EXIT_INTERRUPTED)
  } else {
    ExitCode::SUCCESS
  }
}
