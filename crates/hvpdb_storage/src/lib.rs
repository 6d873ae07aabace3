//! # hvpdb Storage
//!
//! Filesystem primitives underneath the snapshot file and the write-ahead
//! log: reading a file that may not exist yet, writing a fresh file with
//! owner-only permissions, and atomically replacing one file with another
//! (retrying the rename on transient platform errors). None of this crate
//! understands WAL frames or snapshot layout, and it does not abstract over
//! *which* filesystem is underneath — hvpdb has no secondary storage tier
//! to swap one in for; hvpdb_core owns all file format interpretation and
//! talks to the filesystem directly, these helpers included.
//!
//! ## Example
//!
//! ```rust
//! use hvpdb_storage::{read_all_or_empty, write_new_file};
//! use tempfile::tempdir;
//!
//! let dir = tempdir().unwrap();
//! let path = dir.path().join("data.bin");
//! write_new_file(&path, b"hello world").unwrap();
//! assert_eq!(read_all_or_empty(&path).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;

pub use error::{StorageError, StorageResult};
pub use file::{atomic_replace, read_all_or_empty, write_new_file};
