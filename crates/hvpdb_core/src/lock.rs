//! Cross-process advisory locking discipline (§4.2).
//!
//! Three scoped acquisitions over two lock files next to the database path:
//!
//! - [`LockManager::reader_lock`] — shared lock on `.lock`, held for the
//!   duration of [`crate::storage::Storage::load`].
//! - [`LockManager::writer_lock`] — exclusive lock on `.writelock`, held
//!   while a new snapshot is computed and written to a temp file. Does not
//!   block readers, because readers use the separate `.lock` file.
//! - [`LockManager::critical_swap_lock`] — exclusive lock on `.lock`, held
//!   only for the rename + WAL truncation that publish a checkpoint.
//!
//! Locking is best-effort: hvpdb is an embedded, single-process-writer
//! database, and some filesystems (network mounts, certain container
//! overlays) do not support `flock`. A failure to acquire a lock is
//! downgraded to a `tracing::warn!` and the operation proceeds rather than
//! failing outright — see §4.2 and §7's `Locked` recovery policy.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Owns the two lock file paths derived from a database's snapshot path.
#[derive(Debug, Clone)]
pub struct LockManager {
    lock_path: PathBuf,
    write_lock_path: PathBuf,
}

/// RAII guard releasing a held advisory lock on drop.
///
/// If the lock was never actually acquired (because acquisition failed and
/// was downgraded to a warning), dropping this guard is a no-op.
pub struct LockGuard {
    file: Option<File>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!(error = %e, "failed to release advisory lock");
            }
        }
    }
}

impl LockManager {
    /// Derives lock file paths from the database's snapshot path.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        let db_path = db_path.as_ref();
        let mut lock_path = db_path.as_os_str().to_owned();
        lock_path.push(".lock");
        let mut write_lock_path = db_path.as_os_str().to_owned();
        write_lock_path.push(".writelock");
        Self {
            lock_path: PathBuf::from(lock_path),
            write_lock_path: PathBuf::from(write_lock_path),
        }
    }

    /// Acquires the shared reader lock on `.lock`.
    pub fn reader_lock(&self) -> LockGuard {
        self.acquire(&self.lock_path, Acquire::Shared, "reader")
    }

    /// Acquires the exclusive writer lock on `.writelock`.
    pub fn writer_lock(&self) -> LockGuard {
        self.acquire(&self.write_lock_path, Acquire::Exclusive, "writer")
    }

    /// Acquires the exclusive swap lock on `.lock` (shared file with the
    /// reader lock, exclusive mode — this is what briefly blocks readers
    /// during the checkpoint rename).
    pub fn critical_swap_lock(&self) -> LockGuard {
        self.acquire(&self.lock_path, Acquire::Exclusive, "critical-swap")
    }

    fn acquire(&self, path: &Path, mode: Acquire, label: &str) -> LockGuard {
        let file = match OpenOptions::new().read(true).write(true).create(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, lock = label, path = %path.display(), "could not open lock file, proceeding without lock");
                return LockGuard { file: None };
            }
        };

        let result = match mode {
            Acquire::Shared => FileExt::lock_shared(&file),
            Acquire::Exclusive => FileExt::lock_exclusive(&file),
        };

        match result {
            Ok(()) => LockGuard { file: Some(file) },
            Err(e) => {
                tracing::warn!(error = %e, lock = label, path = %path.display(), "could not acquire advisory lock, proceeding without it");
                LockGuard { file: None }
            }
        }
    }
}

enum Acquire {
    Shared,
    Exclusive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reader_and_writer_lock_paths_are_distinct() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db.hvp");
        let mgr = LockManager::new(&db_path);
        assert_ne!(mgr.lock_path, mgr.write_lock_path);
        assert!(mgr.lock_path.to_string_lossy().ends_with(".lock"));
        assert!(mgr.write_lock_path.to_string_lossy().ends_with(".writelock"));
    }

    #[test]
    fn acquiring_and_dropping_locks_does_not_panic() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db.hvp");
        let mgr = LockManager::new(&db_path);

        {
            let _reader = mgr.reader_lock();
        }
        {
            let _writer = mgr.writer_lock();
        }
        {
            let _swap = mgr.critical_swap_lock();
        }
    }

    #[test]
    fn sequential_acquisitions_succeed() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db.hvp");
        let mgr = LockManager::new(&db_path);

        let first = mgr.writer_lock();
        drop(first);
        let second = mgr.writer_lock();
        drop(second);
    }
}
