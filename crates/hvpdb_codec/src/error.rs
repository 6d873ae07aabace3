//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during MsgPack encoding or decoding.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Failed to encode a value to MsgPack.
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode MsgPack bytes.
    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
