//! Implementation of the `strata cache` subcommands.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use strata_lib::cache::BuildCache;

use crate::output::{
  OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success, print_warning,
  symbols, truncate_hash,
};

pub fn cmd_cache_list(cache_dir: PathBuf, output: OutputFormat) -> Result<()> {
  let cache = BuildCache::open(&cache_dir);
  let records = cache.records();

  if output.is_json() {
    return print_json(&records);
  }

  if records.is_empty() {
    print_info(&format!("No cache records in {}", cache_dir.display()));
    return Ok(());
  }

  for record in &records {
    let symbol = if record.artifact_exists() {
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string()
    } else {
      symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string()
    };
    println!(
      "  {} {} {} {} {}",
      symbol,
      record.node_id,
      truncate_hash(record.fingerprint.as_str()).if_supports_color(Stream::Stdout, |s| s.dimmed()),
      record.origin.as_str(),
      record.artifact_path.display()
    );
  }

  Ok(())
}

pub fn cmd_cache_stats(cache_dir: PathBuf, output: OutputFormat) -> Result<()> {
  let cache = BuildCache::open(&cache_dir);
  let stats = cache.stats();
  let records = cache.records();

  let dangling = records.iter().filter(|r| !r.artifact_exists()).count();
  let artifact_bytes: u64 = records
    .iter()
    .filter_map(|r| fs::metadata(&r.artifact_path).ok())
    .map(|m| m.len())
    .sum();

  if output.is_json() {
    return print_json(&serde_json::json!({
      "dir": stats.dir,
      "records": stats.records,
      "dangling": dangling,
      "artifact_bytes": artifact_bytes,
      "degraded": stats.degraded,
    }));
  }

  if stats.degraded {
    print_warning("Cache is unreadable; builds will treat every node as stale");
  }
  print_stat("Directory", &stats.dir.display().to_string());
  print_stat("Records", &stats.records.to_string());
  print_stat("Dangling", &dangling.to_string());
  print_stat("Artifact size", &format_bytes(artifact_bytes));
  Ok(())
}

pub fn cmd_cache_prune(cache_dir: PathBuf, dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let cache = BuildCache::open(&cache_dir);

  let stats = cache.prune(dry_run).context("Failed to prune cache")?;

  if output.is_json() {
    print_json(&stats)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Cache prune complete!");
    }
    for record in &stats.dangling {
      println!(
        "  {} {} {}",
        symbols::SKIP,
        record.node_id,
        record.artifact_path.display()
      );
    }
    print_stat("Records scanned", &stats.scanned.to_string());
    print_stat("Records removed", &stats.removed.to_string());
    print_stat("Records kept", &stats.kept.to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
