//! Default locations for cache and artifact storage.
//!
//! Resolution order for the cache directory: `STRATA_CACHE_DIR`, then
//! `$XDG_CACHE_HOME/strata`, then `~/.cache/strata`.

use std::path::PathBuf;

use crate::consts::{APP_NAME, ARTIFACT_DIR_ENV, CACHE_DIR_ENV};

/// Returns the user's home directory, if one can be determined.
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if one can be determined.
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the platform cache directory for the application.
#[cfg(windows)]
pub fn default_cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the platform cache directory for the application.
#[cfg(not(windows))]
pub fn default_cache_dir() -> PathBuf {
  let cache_home = std::env::var_os("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".cache")))
    .unwrap_or_else(std::env::temp_dir);
  cache_home.join(APP_NAME)
}

/// Cache directory override from the environment, if set.
pub fn cache_dir_override() -> Option<PathBuf> {
  std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from)
}

/// Artifact directory override from the environment, if set.
pub fn artifact_dir_override() -> Option<PathBuf> {
  std::env::var_os(ARTIFACT_DIR_ENV).map(PathBuf::from)
}
