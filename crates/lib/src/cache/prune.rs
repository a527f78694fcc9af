use serde::Serialize;
use tracing::{debug, info};

use super::lock::{LockMode, StoreLock};
use super::{BuildCache, CacheError, CacheRecord};

#[derive(Debug, Default, Serialize)]
pub struct PruneStats {
  pub scanned: usize,
  pub removed: usize,
  pub kept: usize,
  pub dry_run: bool,
  /// Records whose artifact was missing (removed, or would be on a dry run).
  pub dangling: Vec<CacheRecord>,
}

impl BuildCache {
  /// Delete records whose artifact no longer exists.
  ///
  /// Takes the cache lock exclusively, so it fails fast while a build run
  /// holds it.
  pub fn prune(&self, dry_run: bool) -> Result<PruneStats, CacheError> {
    let _lock = StoreLock::acquire(self.dir(), LockMode::Exclusive, "cache prune")?;

    let records = self.store().load_all()?;
    let mut stats = PruneStats {
      dry_run,
      ..Default::default()
    };

    let mut records: Vec<CacheRecord> = records.into_values().collect();
    records.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    for record in records {
      stats.scanned += 1;

      if record.artifact_exists() {
        stats.kept += 1;
        continue;
      }

      debug!(node = %record.node_id, artifact = %record.artifact_path.display(), dry_run, "dangling cache record");
      if !dry_run {
        self.store().remove(&record.fingerprint)?;
        self.forget(&record.fingerprint);
        stats.removed += 1;
      }
      stats.dangling.push(record);
    }

    info!(
      scanned = stats.scanned,
      removed = stats.removed,
      dangling = stats.dangling.len(),
      dry_run,
      "cache prune complete"
    );

    Ok(stats)
  }
}
