//! # hvpdb_core
//!
//! The database engine behind hvpdb: an embedded, encrypted, single-writer
//! document store with WAL-based ACID transactions and authenticated
//! snapshot files.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Database                          │
//! │  (open, group, begin, authenticate, commit)          │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │            Group / Transaction / TransactionGroup     │
//! │  (ambient and buffered document operations)          │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │                    Storage                            │
//! │  (in-memory groups, WAL orchestration, checkpoints)  │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │                          │
//! ┌──────────▼──────────┐    ┌──────────▼───────────────┐
//! │        Wal          │    │     Security / index      │
//! │  (append-only log)  │    │ (AEAD, KDF, secondary idx) │
//! └──────────┬──────────┘    └──────────┬───────────────┘
//!            │                          │
//! ┌──────────▼──────────────────────────▼───────────────┐
//! │                 hvpdb_storage                        │
//! │   (atomic file write/replace, owner-only perms)      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key invariants
//!
//! - ACID transactions: all-or-nothing, durable after commit.
//! - Single writer: the on-disk writer lock admits one writer at a time.
//! - WAL-first: every mutation is appended to the WAL before it is
//!   reflected in memory.
//! - Crash recovery: reopening after a crash replays the WAL from the last
//!   snapshot, discarding any transaction that never committed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hvpdb_core::{Database, Options};
//!
//! let db = Database::open("./data/app", b"correct horse battery staple", Options::default())?;
//! let users = db.group("users")?;
//! users.create_index("email", true)?;
//! users.insert(hvpdb_codec::Value::map(vec![
//!     ("email".to_string(), hvpdb_codec::Value::from("a@example.com")),
//! ]))?;
//! db.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod crypto;
mod database;
mod error;
mod group;
mod index;
mod lock;
mod storage;
mod transaction;
mod uri;
mod wal;

pub use config::Options;
pub use crypto::{KdfParams, Security};
pub use database::Database;
pub use error::{ErrorKind, HvpError, HvpResult};
pub use group::{Group, Query};
pub use lock::{LockGuard, LockManager};
pub use storage::Storage;
pub use transaction::{Transaction, TransactionGroup};
pub use uri::{parse as parse_uri, redact_target, ConnectionInfo};
pub use wal::{Operation, RecordKind, Wal, WalRecord};
