//! Advisory locks over the cache directory.
//!
//! Two kinds:
//! - [`StoreLock`]: whole-cache lock at `{cache_dir}/.lock`. Build runs hold it
//!   shared, pruning holds it exclusive.
//! - [`FingerprintLocks`]: one lock per fingerprint, so concurrent producers of
//!   the same artifact (in this process or another) run one at a time.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::consts::APP_NAME;
use crate::fingerprint::Fingerprint;

const LOCK_FILENAME: &str = ".lock";
const LOCKS_DIR: &str = "locks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub cache_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum CacheLockError {
  #[error(
    "cache is locked by another process: {command} (PID {pid}, started at unix {started_at_unix})\n\
     If you're sure no {app} process is running, remove the lock file:\n  {path}",
    app = APP_NAME,
    path = .lock_path.display()
  )]
  Contention {
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error(
    "cache is locked (could not read lock metadata)\n\
     If you're sure no {app} process is running, remove the lock file:\n  {path}",
    app = APP_NAME,
    path = .lock_path.display()
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create cache directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// Whole-cache lock. Released on drop.
pub struct StoreLock {
  file: File,
  lock_path: PathBuf,
}

impl StoreLock {
  /// Try to take the cache lock without blocking.
  pub fn acquire(cache_dir: &Path, mode: LockMode, command: &str) -> Result<Self, CacheLockError> {
    let lock_path = cache_dir.join(LOCK_FILENAME);

    fs::create_dir_all(cache_dir).map_err(CacheLockError::CreateDir)?;
    let file = open_lock_file(&lock_path).map_err(CacheLockError::OpenFile)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(read_contention_error(&lock_path));
      }
      return Err(CacheLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      write_metadata(&file, command, cache_dir)?;
    }

    debug!(path = %lock_path.display(), ?mode, "acquired cache lock");
    Ok(StoreLock { file, lock_path })
  }

  /// Read metadata through the held handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, command: &str, cache_dir: &Path) -> Result<(), CacheLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    cache_dir: cache_dir.to_path_buf(),
  };

  file.set_len(0).map_err(CacheLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata)
    .map_err(|e| CacheLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(CacheLockError::WriteMetadata)?;

  Ok(())
}

fn read_contention_error(lock_path: &Path) -> CacheLockError {
  if let Ok(contents) = fs::read_to_string(lock_path)
    && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
  {
    return CacheLockError::Contention {
      command: metadata.command,
      pid: metadata.pid,
      started_at_unix: metadata.started_at_unix,
      lock_path: lock_path.to_path_buf(),
    };
  }

  CacheLockError::ContentionUnknown {
    lock_path: lock_path.to_path_buf(),
  }
}

type LockTable = Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>;

/// Per-fingerprint mutual exclusion.
///
/// Locking is two-level: an in-process async mutex, then a blocking
/// exclusive `flock` on `{cache_dir}/locks/<fingerprint>.lock`. If the file
/// lock can't be taken the in-process lock still applies. A fingerprint's
/// mutex is dropped from the table once no guard or waiter refers to it.
#[derive(Debug)]
pub struct FingerprintLocks {
  dir: PathBuf,
  inner: Arc<LockTable>,
}

/// Held while producing one fingerprint. Released on drop.
#[derive(Debug)]
pub struct FingerprintGuard {
  file: Option<File>,
  guard: Option<OwnedMutexGuard<()>>,
  fingerprint: Fingerprint,
  table: Arc<LockTable>,
}

impl Drop for FingerprintGuard {
  fn drop(&mut self) {
    self.file.take();
    self.guard.take();

    let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(mutex) = table.get(&self.fingerprint)
      && Arc::strong_count(mutex) == 1
    {
      table.remove(&self.fingerprint);
    }
  }
}

impl FingerprintLocks {
  pub fn new(cache_dir: &Path) -> Self {
    Self {
      dir: cache_dir.join(LOCKS_DIR),
      inner: Arc::default(),
    }
  }

  /// Number of fingerprints with a live guard or waiter.
  pub fn len(&self) -> usize {
    self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub async fn lock(&self, fingerprint: &Fingerprint) -> FingerprintGuard {
    let mutex = {
      let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
      inner.entry(fingerprint.clone()).or_default().clone()
    };
    let guard = mutex.lock_owned().await;

    let path = self.dir.join(format!("{}.lock", fingerprint));
    let fingerprint = fingerprint.clone();
    let file = match tokio::task::spawn_blocking(move || lock_file_blocking(&path)).await {
      Ok(Ok(file)) => Some(file),
      Ok(Err(e)) => {
        warn!(fingerprint = %fingerprint.short(), error = %e, "cross-process lock unavailable");
        None
      }
      Err(e) => {
        warn!(fingerprint = %fingerprint.short(), error = %e, "lock task failed");
        None
      }
    };

    FingerprintGuard {
      file,
      guard: Some(guard),
      fingerprint,
      table: Arc::clone(&self.inner),
    }
  }
}

fn lock_file_blocking(path: &Path) -> io::Result<File> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let file = open_lock_file(path)?;
  lock_exclusive_blocking(&file)?;
  Ok(file)
}

fn open_lock_file(path: &Path) -> io::Result<File> {
  OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(path)
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(unix)]
fn lock_exclusive_blocking(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::LockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };
  lock_file_ex(file, flags)
}

#[cfg(windows)]
fn lock_exclusive_blocking(file: &File) -> io::Result<()> {
  use windows_sys::Win32::Storage::FileSystem::LOCKFILE_EXCLUSIVE_LOCK;

  lock_file_ex(file, LOCKFILE_EXCLUSIVE_LOCK)
}

#[cfg(windows)]
fn lock_file_ex(file: &File, flags: u32) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::LockFileEx;

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
