//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Definition files every fixture refers to.
const DEFINITIONS: &[&str] = &["mpi", "framework", "project1", "project2"];

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary project directory holding `strata.yaml`,
/// the definitions it names, and (via the fixture's `engine:` section) its
/// cache and artifact directories.
pub struct TestEnv {
  pub temp: TempDir,
  pub manifest_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture file.
  ///
  /// Copies the fixture to `strata.yaml` and writes `defs/<name>.def` for
  /// every definition the fixtures use.
  pub fn from_fixture(name: &str) -> Self {
    let env = Self::empty();
    std::fs::write(&env.manifest_path, fixture_content(name)).unwrap();
    for def in DEFINITIONS {
      env.write_file(&format!("defs/{}.def", def), &format!("Bootstrap: {}\n", def));
    }
    env
  }

  /// Create an empty test environment.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("strata.yaml");
    Self { temp, manifest_path }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn cache_path(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  /// Artifacts built for `id`, one per fingerprint.
  pub fn artifacts(&self, kind: &str, id: &str, extension: &str) -> Vec<PathBuf> {
    find_artifacts(&self.temp.path().join("artifacts"), kind, id, extension)
  }

  /// The single artifact built for `id`.
  pub fn artifact_path(&self, kind: &str, id: &str, extension: &str) -> PathBuf {
    let mut found = self.artifacts(kind, id, extension);
    assert_eq!(found.len(), 1, "expected one artifact for {}, found {:?}", id, found);
    found.remove(0)
  }

  /// Get a pre-configured Command for the strata binary.
  ///
  /// Runs from the project directory and clears environment overrides so the
  /// fixture's `engine:` section decides where the cache and artifacts live.
  pub fn strata_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("strata");
    cmd.current_dir(self.temp.path());
    cmd.env_remove("STRATA_CACHE_DIR");
    cmd.env_remove("STRATA_ARTIFACT_DIR");
    cmd.env_remove("RUST_LOG");
    cmd.env("XDG_CACHE_HOME", self.temp.path().join("xdg-cache"));
    cmd
  }
}

/// Files named `<id>-<12 hex chars>.<extension>` under `<artifact_dir>/<kind>`.
pub fn find_artifacts(artifact_dir: &Path, kind: &str, id: &str, extension: &str) -> Vec<PathBuf> {
  let Ok(entries) = std::fs::read_dir(artifact_dir.join(kind)) else {
    return Vec::new();
  };
  let prefix = format!("{}-", id);
  let suffix = format!(".{}", extension);

  let mut found: Vec<PathBuf> = entries
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| {
      path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(&prefix))
        .and_then(|rest| rest.strip_suffix(&suffix))
        .is_some_and(|short| short.len() == 12 && short.bytes().all(|b| b.is_ascii_hexdigit()))
    })
    .collect();
  found.sort();
  found
}
