//! Filesystem helpers for hvpdb_core's snapshot checkpoint protocol.
//!
//! hvpdb has exactly one on-disk byte store worth naming specially: the pair
//! of files (snapshot + WAL) a caller reads and atomically replaces. These
//! three functions are the whole of that surface — there is no pluggable
//! backend abstraction here, because this spec has no secondary storage
//! tier to swap one in for.

use crate::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Mode applied to newly created database files where the OS permits it.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Reads the entire file at `path`, or an empty vector if it does not exist.
///
/// # Errors
///
/// Returns an error on any I/O failure other than "not found".
pub fn read_all_or_empty(path: &Path) -> StorageResult<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Writes `bytes` to a fresh file at `path` with owner-only permissions,
/// flushing and fsyncing before returning.
///
/// # Errors
///
/// Returns an error on any I/O failure.
pub fn write_new_file(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    set_owner_only_permissions(&file)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

/// Atomically replaces `dest` with `src` via rename, retrying a bounded
/// number of times on the transient errors some platforms (notably Windows)
/// can surface when another process briefly has the destination open.
///
/// # Errors
///
/// Returns the last rename error if every retry is exhausted.
pub fn atomic_replace(src: &Path, dest: &Path) -> StorageResult<()> {
    const MAX_ATTEMPTS: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_millis(100);

    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match std::fs::rename(src, dest) {
            Ok(()) => {
                sync_parent_dir(dest);
                return Ok(());
            }
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < MAX_ATTEMPTS {
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
    }
    Err(StorageError::Io(last_err.expect("loop runs at least once")))
}

#[cfg(unix)]
fn set_owner_only_permissions(file: &File) -> StorageResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(FILE_MODE);
    file.set_permissions(perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_file: &File) -> StorageResult<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
