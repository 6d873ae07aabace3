//! Error types for hvpdb core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type HvpResult<T> = Result<T, HvpError>;

/// The boundary error kinds external callers (shell, HTTP server, CLI,
/// plugins) switch on. Every [`HvpError`] variant maps onto exactly one of
/// these; internal variants are free to be more specific, but the kind is
/// the stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `open()` was called without a password.
    AuthRequired,
    /// AEAD tag or KDF mismatch on the snapshot or WAL.
    BadPassword,
    /// CRC, framing, or format corruption that is not a password mismatch.
    Corrupt,
    /// A required file lock could not be acquired.
    Locked,
    /// A referenced entity (group, document, user) does not exist.
    NotFound,
    /// A unique-index constraint would be violated.
    Duplicate,
    /// A malformed argument (group name, query, password) was supplied.
    InvalidArgument,
    /// A filesystem operation failed.
    Io,
    /// An unsupported snapshot or WAL version was encountered.
    Unsupported,
}

/// Errors that can occur in hvpdb core operations.
#[derive(Debug, Error)]
pub enum HvpError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] hvpdb_storage::StorageError),

    /// MsgPack codec error.
    #[error("codec error: {0}")]
    Codec(#[from] hvpdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `open()` was called without a password.
    #[error("password required to open database")]
    AuthRequired,

    /// Snapshot or WAL AEAD tag failed to verify (wrong password, tampered
    /// file, wrong salt/KDF, wrong AAD).
    #[error("authentication failed decrypting {what}: wrong password or tampered file")]
    BadPassword {
        /// What was being decrypted (`"snapshot"`, `"wal record"`, ...).
        what: String,
    },

    /// Corruption was detected that is not attributable to a wrong password:
    /// CRC mismatch, malformed header, impossible frame length.
    #[error("corrupt {what}: {message}")]
    Corrupt {
        /// What was found corrupt.
        what: String,
        /// Description of the corruption.
        message: String,
    },

    /// A required advisory file lock could not be acquired. Per §4.2 this is
    /// downgraded to a warning in the locking code itself; this variant
    /// exists for callers that want to surface it as a hard error (e.g. the
    /// CLI `--strict-locking` flag).
    #[error("could not acquire lock: {message}")]
    Locked {
        /// Description of which lock and why.
        message: String,
    },

    /// Group, document, or user not found.
    #[error("not found: {what}")]
    NotFound {
        /// What was not found.
        what: String,
    },

    /// A unique-index constraint would be violated.
    #[error("duplicate value {value:?} for unique index '{field}' on group '{group}'")]
    Duplicate {
        /// Group holding the violated index.
        group: String,
        /// Indexed field.
        field: String,
        /// The value that collided.
        value: String,
    },

    /// Bad group name, malformed query, or other invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// Snapshot version not in {1, 2}, or WAL version != 2.
    #[error("unsupported {what} version {version}")]
    Unsupported {
        /// What carries the version (`"snapshot"` or `"wal"`).
        what: String,
        /// The version found on disk.
        version: u16,
    },

    /// A transaction operation was attempted in an invalid state (e.g.
    /// committing a transaction twice).
    #[error("invalid transaction state: {message}")]
    TransactionState {
        /// Description of the state violation.
        message: String,
    },
}

impl HvpError {
    /// Maps this error onto the stable boundary [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRequired => ErrorKind::AuthRequired,
            Self::BadPassword { .. } => ErrorKind::BadPassword,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Locked { .. } => ErrorKind::Locked,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Duplicate { .. } => ErrorKind::Duplicate,
            Self::InvalidArgument { .. } | Self::TransactionState { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Io(_) | Self::Storage(_) | Self::Codec(_) => ErrorKind::Io,
        }
    }

    /// Builds a [`Self::BadPassword`] error.
    pub fn bad_password(what: impl Into<String>) -> Self {
        Self::BadPassword { what: what.into() }
    }

    /// Builds a [`Self::Corrupt`] error.
    pub fn corrupt(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Builds a [`Self::Locked`] error.
    pub fn locked(message: impl Into<String>) -> Self {
        Self::Locked {
            message: message.into(),
        }
    }

    /// Builds a [`Self::NotFound`] error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Builds a [`Self::Duplicate`] error.
    pub fn duplicate(
        group: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Duplicate {
            group: group.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Builds a [`Self::InvalidArgument`] error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Builds a [`Self::Unsupported`] error.
    pub fn unsupported(what: impl Into<String>, version: u16) -> Self {
        Self::Unsupported {
            what: what.into(),
            version,
        }
    }

    /// Builds a [`Self::TransactionState`] error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }
}
