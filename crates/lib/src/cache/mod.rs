//! Persistent fingerprint → artifact cache.
//!
//! Records are write-once and keyed by fingerprint. A record makes a node
//! fresh only while its artifact still exists. The cache never evicts; see
//! [`BuildCache::prune`] for the separate housekeeping pass.
//!
//! If the record directory can't be read at open time the cache runs
//! *degraded*: every node is treated as stale, writes are still attempted,
//! and failures are logged rather than returned to the scheduler.

mod lock;
mod prune;
mod record;
mod store;

pub use lock::{CacheLockError, FingerprintGuard, FingerprintLocks, LockMetadata, LockMode, StoreLock};
pub use prune::PruneStats;
pub use record::{CacheRecord, RecordOrigin};
pub use store::{RecordStore, WriteOutcome};

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::fingerprint::Fingerprint;
use crate::node::BuildNode;

const RECORDS_DIR: &str = "records";

#[derive(Debug, Error)]
pub enum CacheError {
  /// The record directory could not be listed.
  #[error("cache directory {} is unreadable: {source}", path.display())]
  Unreadable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write cache record {}: {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to encode cache record: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("node {0} has no fingerprint")]
  MissingFingerprint(String),

  #[error(transparent)]
  Lock(#[from] CacheLockError),
}

/// Summary of the cache's state.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
  pub dir: PathBuf,
  pub records: usize,
  pub degraded: bool,
}

#[derive(Debug)]
pub struct BuildCache {
  dir: PathBuf,
  store: RecordStore,
  degraded: bool,
  records: Mutex<HashMap<Fingerprint, CacheRecord>>,
  /// Node ids the caller forced stale.
  forced: Mutex<HashSet<String>>,
  /// Fingerprints recorded through this instance.
  produced: Mutex<HashSet<Fingerprint>>,
  locks: FingerprintLocks,
}

impl BuildCache {
  /// Open the cache rooted at `dir`. Never fails; an unreadable record
  /// directory yields a degraded cache.
  pub fn open(dir: impl Into<PathBuf>) -> Self {
    let dir = dir.into();
    let store = RecordStore::new(dir.join(RECORDS_DIR));

    let (records, degraded) = match store.load_all() {
      Ok(records) => (records, false),
      Err(e) => {
        error!(dir = %dir.display(), error = %e, "cache unreadable, treating every node as stale");
        (HashMap::new(), true)
      }
    };

    info!(dir = %dir.display(), records = records.len(), degraded, "opened build cache");

    Self {
      locks: FingerprintLocks::new(&dir),
      dir,
      store,
      degraded,
      records: Mutex::new(records),
      forced: Mutex::new(HashSet::new()),
      produced: Mutex::new(HashSet::new()),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn is_degraded(&self) -> bool {
    self.degraded
  }

  /// Find the record for `fingerprint`.
  ///
  /// Checks records known to this instance first, then the disk, so records
  /// written by other processes are picked up. A degraded cache only knows
  /// what it recorded itself.
  pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheRecord> {
    if let Some(record) = self.records_guard().get(fingerprint) {
      return Some(record.clone());
    }

    if self.degraded {
      return None;
    }

    let record = self.store.read(fingerprint)?;
    self.records_guard().insert(fingerprint.clone(), record.clone());
    Some(record)
  }

  /// Whether `node` can skip building.
  ///
  /// True iff the node has a fingerprint with a record whose artifact still
  /// exists, and the node wasn't forced stale. A forced node becomes fresh
  /// again once its fingerprint is recorded through this cache.
  pub fn is_fresh(&self, node: &BuildNode) -> bool {
    let Some(fingerprint) = &node.fingerprint else {
      return false;
    };

    let forced = self.forced.lock().unwrap_or_else(|e| e.into_inner()).contains(&node.id);
    if forced && !self.produced.lock().unwrap_or_else(|e| e.into_inner()).contains(fingerprint) {
      return false;
    }

    match self.lookup(fingerprint) {
      Some(record) if record.artifact_exists() => true,
      Some(record) => {
        debug!(node = %node.id, artifact = %record.artifact_path.display(), "cached artifact missing");
        false
      }
      None => false,
    }
  }

  /// Record a locally built artifact for `node`.
  pub fn record(&self, node: &BuildNode, artifact: &Path) -> Result<CacheRecord, CacheError> {
    self.insert(node, artifact, RecordOrigin::Built)
  }

  /// Record an artifact obtained from a registry. Pulled and built artifacts
  /// share the fingerprint key space.
  pub fn record_pulled(&self, node: &BuildNode, artifact: &Path) -> Result<CacheRecord, CacheError> {
    self.insert(node, artifact, RecordOrigin::Pulled)
  }

  /// Make `node` stale regardless of any matching record. The record itself
  /// is kept.
  pub fn force_stale(&self, node: &BuildNode) {
    debug!(node = %node.id, "forcing stale");
    self.forced.lock().unwrap_or_else(|e| e.into_inner()).insert(node.id.clone());
  }

  /// All known records, sorted by node id then fingerprint.
  pub fn records(&self) -> Vec<CacheRecord> {
    let mut merged = self.records_guard().clone();
    if !self.degraded
      && let Ok(on_disk) = self.store.load_all()
    {
      for (fingerprint, record) in on_disk {
        merged.entry(fingerprint).or_insert(record);
      }
    }

    let mut records: Vec<CacheRecord> = merged.into_values().collect();
    records.sort_by(|a, b| (&a.node_id, &a.fingerprint).cmp(&(&b.node_id, &b.fingerprint)));
    records
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      dir: self.dir.clone(),
      records: self.records().len(),
      degraded: self.degraded,
    }
  }

  /// Take the per-fingerprint lock.
  pub async fn lock(&self, fingerprint: &Fingerprint) -> FingerprintGuard {
    self.locks.lock(fingerprint).await
  }

  pub(crate) fn store(&self) -> &RecordStore {
    &self.store
  }

  pub(crate) fn forget(&self, fingerprint: &Fingerprint) {
    self.records_guard().remove(fingerprint);
  }

  fn insert(&self, node: &BuildNode, artifact: &Path, origin: RecordOrigin) -> Result<CacheRecord, CacheError> {
    let fingerprint = node
      .fingerprint
      .clone()
      .ok_or_else(|| CacheError::MissingFingerprint(node.id.clone()))?;

    let record = CacheRecord::new(
      fingerprint.clone(),
      &node.id,
      node.base_fingerprint.clone(),
      artifact,
      origin,
    );

    self.records_guard().insert(fingerprint.clone(), record.clone());
    self.produced.lock().unwrap_or_else(|e| e.into_inner()).insert(fingerprint.clone());

    let outcome = self.store.write(&record)?;
    debug!(node = %node.id, fingerprint = %fingerprint.short(), ?outcome, ?origin, "recorded artifact");
    Ok(record)
  }

  fn records_guard(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, CacheRecord>> {
    self.records.lock().unwrap_or_else(|e| e.into_inner())
  }
}
