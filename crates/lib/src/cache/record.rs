use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::consts::CACHE_RECORD_VERSION;
use crate::fingerprint::Fingerprint;

/// How an artifact came to be in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
  Built,
  Pulled,
}

impl RecordOrigin {
  pub fn as_str(self) -> &'static str {
    match self {
      RecordOrigin::Built => "built",
      RecordOrigin::Pulled => "pulled",
    }
  }
}

/// One immutable cache entry, keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
  pub version: u32,
  pub fingerprint: Fingerprint,
  pub artifact_path: PathBuf,
  pub node_id: String,
  pub base_fingerprint: Option<Fingerprint>,
  /// Unix seconds.
  pub created_at: u64,
  pub origin: RecordOrigin,
}

impl CacheRecord {
  pub fn new(
    fingerprint: Fingerprint,
    node_id: impl Into<String>,
    base_fingerprint: Option<Fingerprint>,
    artifact_path: impl Into<PathBuf>,
    origin: RecordOrigin,
  ) -> Self {
    Self {
      version: CACHE_RECORD_VERSION,
      fingerprint,
      artifact_path: artifact_path.into(),
      node_id: node_id.into(),
      base_fingerprint,
      created_at: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      origin,
    }
  }

  /// Whether the artifact still exists and can be opened.
  pub fn artifact_exists(&self) -> bool {
    artifact_readable(&self.artifact_path)
  }
}

fn artifact_readable(path: &Path) -> bool {
  match fs::metadata(path) {
    Ok(meta) if meta.is_dir() => fs::read_dir(path).is_ok(),
    Ok(_) => fs::File::open(path).is_ok(),
    Err(_) => false,
  }
}
