//! CLI output formatting utilities.
//!
//! Colored status lines, node status symbols and human-readable
//! byte/duration formatting.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use strata_lib::scheduler::NodeReport;
use strata_lib::node::NodeStatus;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const CACHED: &str = "=";
  pub const BUILD: &str = "+";
  pub const SKIP: &str = "-";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_bytes(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = KB * 1024;
  const GB: u64 = MB * 1024;

  if bytes >= GB {
    format!("{:.1} GB", bytes as f64 / GB as f64)
  } else if bytes >= MB {
    format!("{:.1} MB", bytes as f64 / MB as f64)
  } else if bytes >= KB {
    format!("{:.1} KB", bytes as f64 / KB as f64)
  } else {
    format!("{} B", bytes)
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 3600 {
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
  } else if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// One line per node: symbol, id, short fingerprint and outcome.
pub fn print_node_report(node: &NodeReport) {
  let fingerprint = node.fingerprint.as_ref().map(|fp| fp.short()).unwrap_or("-");
  let (symbol, detail) = match node.status {
    NodeStatus::Built if node.was_cached() => (
      symbols::CACHED.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
      "cached".to_string(),
    ),
    NodeStatus::Built => (
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
      "built".to_string(),
    ),
    NodeStatus::Failed => (
      symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
      match &node.error {
        Some(e) => format!("failed: {}", e),
        None => "failed".to_string(),
      },
    ),
    NodeStatus::Skipped => (
      symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      match &node.failed_ancestor {
        Some(ancestor) => format!("skipped ({} failed)", ancestor),
        None => "skipped".to_string(),
      },
    ),
    other => (
      symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      other.as_str().to_string(),
    ),
  };

  println!(
    "  {} {} {} {}",
    symbol,
    node.id,
    fingerprint.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    detail
  );
}
