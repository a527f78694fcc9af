mod cmd;
mod output;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata_lib::consts::DEFAULT_MANIFEST;

use crate::cmd::BuildOptions;
use crate::output::{OutputFormat, print_error};
use crate::render::GraphFormat;

/// strata - layered container builds with a fingerprint cache
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true, conflicts_with = "quiet")]
  verbose: bool,

  /// Only log warnings and errors
  #[arg(short, long, global = true)]
  quiet: bool,

  /// Path to the manifest
  #[arg(short = 'f', long = "file", global = true, default_value = DEFAULT_MANIFEST)]
  file: PathBuf,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every stale node
  Build {
    /// Rebuild these nodes (comma-separated ids, or `all`) and their dependents
    #[arg(long, value_name = "IDS", num_args = 0..=1, default_missing_value = "all")]
    force_rebuild: Option<String>,

    /// Ignore the cache entirely
    #[arg(long)]
    no_cache: bool,

    /// Maximum concurrent builds
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    jobs: Option<u32>,

    /// Build one node at a time
    #[arg(long, conflicts_with = "jobs")]
    sequential: bool,

    /// Per-node build timeout (e.g. `90m`, `2h`)
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Show what would be built without building
    #[arg(long)]
    dry_run: bool,

    /// Print the build stages and exit
    #[arg(long, conflicts_with = "dry_run")]
    graph_only: bool,

    /// Cache directory (overrides manifest and environment)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Artifact directory (overrides manifest and environment)
    #[arg(long)]
    artifact_dir: Option<PathBuf>,
  },

  /// Show build stages and which nodes are stale
  Plan {
    /// Treat these nodes (comma-separated ids, or `all`) and their dependents as stale
    #[arg(long, value_name = "IDS", num_args = 0..=1, default_missing_value = "all")]
    force_rebuild: Option<String>,

    /// Treat every node as stale
    #[arg(long)]
    no_cache: bool,

    /// Cache directory (overrides manifest and environment)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
  },

  /// Export the dependency graph
  Graph {
    /// Rendering (defaults to `text`, or `json` with `--output json`)
    #[arg(long, value_enum)]
    format: Option<GraphFormat>,

    /// Write to a file instead of stdout
    #[arg(short = 'w', long, value_name = "PATH")]
    write: Option<PathBuf>,

    /// Highlight nodes that are already cached
    #[arg(long)]
    cached: bool,

    /// Cache directory used with `--cached`
    #[arg(long)]
    cache_dir: Option<PathBuf>,
  },

  /// Inspect or clean the build cache
  Cache {
    /// Cache directory (defaults to the manifest's, if present)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: CacheCommands,
  },
}

#[derive(Subcommand)]
enum CacheCommands {
  /// List cache records
  List,

  /// Show cache statistics
  Stats,

  /// Remove records whose artifact no longer exists
  Prune {
    /// Show what would be removed without removing it
    #[arg(long)]
    dry_run: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose, cli.quiet);

  match run(cli) {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode> {
  let file = cli.file;
  let output = cli.output;

  match cli.command {
    Commands::Build {
      force_rebuild,
      no_cache,
      jobs,
      sequential,
      timeout,
      dry_run,
      graph_only,
      cache_dir,
      artifact_dir,
    } => cmd::cmd_build(
      &file,
      BuildOptions {
        force_rebuild,
        no_cache,
        jobs: jobs.map(|j| j as usize),
        sequential,
        timeout,
        dry_run,
        graph_only,
        cache_dir,
        artifact_dir,
      },
      output,
    ),
    Commands::Plan {
      force_rebuild,
      no_cache,
      cache_dir,
    } => cmd::cmd_plan(&file, force_rebuild.as_deref(), no_cache, cache_dir, output).map(|_| ExitCode::SUCCESS),
    Commands::Graph {
      format,
      write,
      cached,
      cache_dir,
    } => cmd::cmd_graph(&file, format, write, cached, cache_dir, output).map(|_| ExitCode::SUCCESS),
    Commands::Cache { cache_dir, command } => {
      let cache_dir = cmd::cache_dir_for(&file, cache_dir)?;
      match command {
        CacheCommands::List => cmd::cmd_cache_list(cache_dir, output),
        CacheCommands::Stats => cmd::cmd_cache_stats(cache_dir, output),
        CacheCommands::Prune { dry_run } => cmd::cmd_cache_prune(cache_dir, dry_run, output),
      }
      .map(|_| ExitCode::SUCCESS)
    }
  }
}

/// `-v` / `-q` win over `RUST_LOG`; otherwise `RUST_LOG`, then `info`.
fn init_logging(verbose: bool, quiet: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else if quiet {
    EnvFilter::new("warn")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
