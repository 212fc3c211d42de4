//! The durable store contract: a single JSON file, guarded by an exclusive lock for
//! every read-modify-write cycle, replaced atomically on every write.
//!
//! Atomicity comes from writing to a temp file in the same directory and renaming it
//! over the target — same-volume renames are atomic, and the lock already serializes
//! writers, so there is no window where a reader observes a half-written file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::domain::TaskStore;
use crate::errors::StoreError;

use super::lock::FileLocker;

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    locker: FileLocker,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let path = path.into();
        Self {
            path,
            locker: FileLocker::new(lock_timeout),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }

    /// Acquires the store's exclusive lock, reads the current document (or creates an
    /// empty one if the file doesn't exist yet), hands it to `f`, and — if `f` returns
    /// `Ok` — writes the (possibly mutated) document back atomically before releasing
    /// the lock.
    ///
    /// `f` returning `Err` aborts the write: the on-disk file is left untouched.
    pub fn with_lock<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut TaskStore) -> Result<R, StoreError>,
    {
        let lock_path = self.lock_path();
        let guard = self
            .locker
            .lock_exclusive(&lock_path)
            .map_err(|source| StoreError::Io {
                path: lock_path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
            })?
            .ok_or_else(|| StoreError::LockTimeout {
                path: lock_path.clone(),
                timeout_secs: self.locker_timeout_secs(),
            })?;

        let mut store = self.read_or_init()?;
        let result = f(&mut store)?;
        store.last_modified = Utc::now();
        self.write_atomic(&store)?;
        drop(guard);
        Ok(result)
    }

    /// Reads the document under lock without writing it back. Used for snapshots
    /// (e.g. intake's pre-merge backup) where the caller mutates a clone, not the
    /// version on disk.
    pub fn snapshot(&self) -> Result<TaskStore, StoreError> {
        let lock_path = self.lock_path();
        let guard = self
            .locker
            .lock_exclusive(&lock_path)
            .map_err(|source| StoreError::Io {
                path: lock_path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
            })?
            .ok_or_else(|| StoreError::LockTimeout {
                path: lock_path.clone(),
                timeout_secs: self.locker_timeout_secs(),
            })?;
        let store = self.read_or_init()?;
        drop(guard);
        Ok(store)
    }

    /// Restores a previously-read snapshot verbatim, under lock. Used by intake's
    /// rollback path when a gate check fails after tasks were already merged in.
    pub fn restore(&self, snapshot: &TaskStore) -> Result<(), StoreError> {
        let lock_path = self.lock_path();
        let guard = self
            .locker
            .lock_exclusive(&lock_path)
            .map_err(|source| StoreError::Io {
                path: lock_path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, source.to_string()),
            })?
            .ok_or_else(|| StoreError::LockTimeout {
                path: lock_path.clone(),
                timeout_secs: self.locker_timeout_secs(),
            })?;
        self.write_atomic(snapshot)?;
        drop(guard);
        Ok(())
    }

    fn locker_timeout_secs(&self) -> u64 {
        self.locker.timeout().as_secs()
    }

    fn read_or_init(&self) -> Result<TaskStore, StoreError> {
        if !self.path.exists() {
            return Ok(TaskStore::new(Utc::now()));
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_atomic(&self, store: &TaskStore) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("store");
        let tmp_path = dir.join(format!("{stem}.{}.tmp", std::process::id()));

        let serialized = serde_json::to_string_pretty(store).map_err(|source| StoreError::Corrupt {
            path: tmp_path.clone(),
            source,
        })?;

        fs::write(&tmp_path, serialized).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io {
                path: self.path.clone(),
                source,
            }
        })?;

        Ok(())
    }
}
