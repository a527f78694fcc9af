//! On-disk record storage.
//!
//! # Layout
//!
//! ```text
//! {cache_dir}/records/
//! └── <fingerprint>.json    # one CacheRecord per file
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;

use super::CacheError;
use super::record::CacheRecord;

/// Result of [`RecordStore::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
  /// A new record file was created.
  Written,
  /// A corrupt or dangling record was replaced.
  Replaced,
  /// A valid record already existed and was left untouched.
  Existing,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
  dir: PathBuf,
}

impl RecordStore {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.dir.join(format!("{}.json", fingerprint))
  }

  /// Load every valid record.
  ///
  /// A missing directory is an empty store. Files that fail to parse are
  /// logged and skipped. Fails only when the directory itself can't be read.
  pub fn load_all(&self) -> Result<HashMap<Fingerprint, CacheRecord>, CacheError> {
    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
      Err(source) => {
        return Err(CacheError::Unreadable {
          path: self.dir.clone(),
          source,
        });
      }
    };

    let mut records = HashMap::new();
    for entry in entries {
      let entry = entry.map_err(|source| CacheError::Unreadable {
        path: self.dir.clone(),
        source,
      })?;
      let path = entry.path();

      let Some(fingerprint) = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(".json"))
        .and_then(Fingerprint::from_hex)
      else {
        continue;
      };

      if let Some(record) = self.read_path(&path, &fingerprint) {
        records.insert(fingerprint, record);
      }
    }

    debug!(dir = %self.dir.display(), count = records.len(), "loaded cache records");
    Ok(records)
  }

  /// Read the record for `fingerprint`, if a valid one exists.
  pub fn read(&self, fingerprint: &Fingerprint) -> Option<CacheRecord> {
    self.read_path(&self.record_path(fingerprint), fingerprint)
  }

  fn read_path(&self, path: &Path, fingerprint: &Fingerprint) -> Option<CacheRecord> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to read cache record, ignoring");
        return None;
      }
    };

    match serde_json::from_str::<CacheRecord>(&content) {
      Ok(record) if &record.fingerprint == fingerprint => Some(record),
      Ok(record) => {
        warn!(
          path = %path.display(),
          found = %record.fingerprint,
          "cache record fingerprint does not match its file name, ignoring"
        );
        None
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "corrupt cache record, ignoring");
        None
      }
    }
  }

  /// Persist `record` atomically.
  ///
  /// The record is written to a temp file in the same directory and then
  /// linked into place without clobbering. If a file is already there it is
  /// kept when it holds a valid record whose artifact still exists, and
  /// replaced otherwise.
  pub fn write(&self, record: &CacheRecord) -> Result<WriteOutcome, CacheError> {
    let path = self.record_path(&record.fingerprint);
    let write_err = |source: io::Error| CacheError::Write {
      path: path.clone(),
      source,
    };

    fs::create_dir_all(&self.dir).map_err(write_err)?;

    let mut temp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
    serde_json::to_writer_pretty(&mut temp, record)?;
    temp.flush().map_err(write_err)?;

    match temp.persist_noclobber(&path) {
      Ok(_) => Ok(WriteOutcome::Written),
      Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
        if let Some(existing) = self.read(&record.fingerprint)
          && existing.artifact_exists()
        {
          debug!(fingerprint = %record.fingerprint.short(), "cache record already present");
          return Ok(WriteOutcome::Existing);
        }
        e.file.persist(&path).map_err(|e| write_err(e.error))?;
        Ok(WriteOutcome::Replaced)
      }
      Err(e) => Err(write_err(e.error)),
    }
  }

  /// Delete the record for `fingerprint`. Missing files are not an error.
  pub fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
    let path = self.record_path(fingerprint);
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CacheError::Write { path, source }),
    }
  }
}
