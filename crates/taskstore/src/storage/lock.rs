//! Cross-platform exclusive file locking for the durable store.
//!
//! Uses advisory file locks (flock on Unix, LockFileEx on Windows, both via `fs4`) so a
//! stale lock file left behind by a crashed process is harmless — the lock lives on the
//! file descriptor, not the inode.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt as Fs4FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lock guard that releases the lock when dropped (RAII).
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    fn new(file: File, path: PathBuf) -> Self {
        Self { file, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = Fs4FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Acquires an exclusive lock on a `<path>.lock` file, polling until `timeout` elapses.
///
/// # Examples
///
/// ```no_run
/// use taskstore::storage::lock::FileLocker;
/// use std::path::Path;
/// use std::time::Duration;
///
/// let locker = FileLocker::new(Duration::from_secs(5));
/// let guard = locker.lock_exclusive(Path::new("Task.json.lock")).unwrap();
/// // ... read-modify-write the store ...
/// drop(guard);
/// ```
#[derive(Debug, Clone)]
pub struct FileLocker {
    timeout: Duration,
}

impl FileLocker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block (polling every 10ms) until the exclusive lock is acquired or `timeout`
    /// elapses, in which case the caller gets `None` back and can raise its own
    /// `StoreError::LockTimeout`.
    pub fn lock_exclusive(&self, path: &Path) -> Result<Option<LockGuard>> {
        let file = self.open_or_create(path)?;
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            match Fs4FileExt::try_lock_exclusive(&file) {
                Ok(true) => return Ok(Some(LockGuard::new(file, path.to_path_buf()))),
                Ok(false) => {
                    if start.elapsed() >= self.timeout {
                        return Ok(None);
                    }
                    std::thread::sleep(poll_interval);
                }
                Err(e) => {
                    anyhow::bail!("I/O error while trying to lock {}: {}", path.display(), e);
                }
            }
        }
    }

    fn open_or_create(&self, path: &Path) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open lock file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn exclusive_lock_acquired() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.lock");

        let locker = FileLocker::new(Duration::from_millis(100));
        let guard = locker.lock_exclusive(&file_path).unwrap();

        assert!(guard.is_some());
    }

    #[test]
    fn lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.lock");

        let locker = FileLocker::new(Duration::from_millis(100));

        {
            let _guard = locker.lock_exclusive(&file_path).unwrap();
        }

        let guard2 = locker.lock_exclusive(&file_path).unwrap();
        assert!(guard2.is_some());
    }

    #[test]
    fn exclusive_lock_prevents_concurrent_writes() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.lock");

        let path1 = Arc::new(file_path.clone());
        let acquired = Arc::new(Mutex::new(false));
        let acquired1 = Arc::clone(&acquired);

        let handle1 = thread::spawn(move || {
            let locker = FileLocker::new(Duration::from_millis(500));
            let _guard = locker.lock_exclusive(&path1).unwrap();
            *acquired1.lock().unwrap() = true;
            thread::sleep(Duration::from_millis(200));
        });

        thread::sleep(Duration::from_millis(50));
        assert!(*acquired.lock().unwrap());

        let path2 = file_path.clone();
        let handle2 = thread::spawn(move || {
            let locker = FileLocker::new(Duration::from_millis(50));
            locker.lock_exclusive(&path2).unwrap()
        });

        handle1.join().unwrap();
        let result2 = handle2.join().unwrap();

        assert!(result2.is_none(), "second locker should time out while the first holds the lock");
    }

    #[test]
    fn try_lock_returns_none_when_held() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.lock");

        let holder = FileLocker::new(Duration::from_secs(5));
        let _held = holder.lock_exclusive(&file_path).unwrap();

        let locker = FileLocker::new(Duration::from_millis(20));
        let result = locker.lock_exclusive(&file_path).unwrap();
        assert!(result.is_none());
    }
}
