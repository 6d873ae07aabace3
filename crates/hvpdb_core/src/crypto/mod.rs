//! Password-derived AEAD security context (§4.1).
//!
//! [`Security`] is the one place hvpdb touches cryptography: it derives a
//! 32-byte key from a password via Argon2id, then uses that key for
//! AES-256-GCM authenticated encryption of the snapshot body and every WAL
//! record. The key is held only in memory and zeroized on [`Security::clear`]
//! or drop.

mod security;

pub use security::{KdfParams, Security, KEY_SIZE, NONCE_SIZE, SALT_SIZE};
