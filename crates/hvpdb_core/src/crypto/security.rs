//! Argon2id key derivation plus AES-256-GCM AEAD (§4.1).

use crate::error::{HvpError, HvpResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Size of the derived AES-256 key, in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the random salt persisted alongside the snapshot/WAL header.
pub const SALT_SIZE: usize = 16;
/// Size of the AES-GCM nonce.
pub const NONCE_SIZE: usize = 12;

/// Argon2id tuning parameters, persisted in the snapshot/WAL header so a
/// reopened database derives the same key from the same password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Iteration count.
    pub time_cost: u32,
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: 4,
            memory_cost: 102_400,
            parallelism: 4,
        }
    }
}

/// Password-derived AEAD security context.
///
/// Derives a 32-byte key from a password via Argon2id once, at
/// construction, then uses that key for AES-256-GCM encryption/decryption
/// of snapshot bodies and WAL records. The password bytes themselves are
/// never retained past [`Security::new`] returning.
pub struct Security {
    salt: [u8; SALT_SIZE],
    kdf_params: KdfParams,
    key: Option<Box<[u8; KEY_SIZE]>>,
}

impl Security {
    /// Derives a new security context from `password`.
    ///
    /// If `salt` is `None`, 16 random bytes are generated. If `kdf` is
    /// `None`, [`KdfParams::default`] is used. Both are retained and
    /// returned by [`Self::salt`] / [`Self::kdf_params`] so callers can
    /// persist them in a file header.
    ///
    /// # Errors
    ///
    /// Returns [`HvpError::KeyDerivation`]-shaped corruption error if the
    /// Argon2 parameters are invalid (e.g. memory cost too low for the
    /// configured parallelism).
    pub fn new(password: &[u8], salt: Option<[u8; SALT_SIZE]>, kdf: Option<KdfParams>) -> HvpResult<Self> {
        let salt = salt.unwrap_or_else(|| {
            let mut buf = [0u8; SALT_SIZE];
            rand::thread_rng().fill_bytes(&mut buf);
            buf
        });
        let kdf_params = kdf.unwrap_or_default();

        let params = Params::new(
            kdf_params.memory_cost,
            kdf_params.time_cost,
            kdf_params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| HvpError::corrupt("kdf params", e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Box::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(password, &salt, key.as_mut_slice())
            .map_err(|e| HvpError::corrupt("kdf", e.to_string()))?;

        Ok(Self {
            salt,
            kdf_params,
            key: Some(key),
        })
    }

    /// The salt used for key derivation, for persistence in a file header.
    #[must_use]
    pub fn salt(&self) -> [u8; SALT_SIZE] {
        self.salt
    }

    /// The Argon2id parameters used for key derivation, for persistence in
    /// a file header.
    #[must_use]
    pub fn kdf_params(&self) -> KdfParams {
        self.kdf_params
    }

    /// Encrypts `plaintext` with a fresh random nonce, returning
    /// `(nonce, ciphertext)`. `aad` is authenticated but not encrypted.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has been [`cleared`](Self::clear).
    pub fn encrypt(&self, plaintext: &[u8], aad: Option<&[u8]>) -> HvpResult<(Vec<u8>, Vec<u8>)> {
        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: aad.unwrap_or(&[]),
                },
            )
            .map_err(|_| HvpError::corrupt("aead", "encryption failed"))?;

        Ok((nonce_bytes.to_vec(), ciphertext))
    }

    /// Decrypts `ciphertext` given the `nonce` produced by [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`HvpError::BadPassword`] if the AEAD tag does not verify —
    /// this is the single failure mode for wrong password, tampered bytes,
    /// a wrong salt/KDF, or a mismatched AAD; AES-GCM does not distinguish
    /// between them.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8], aad: Option<&[u8]>) -> HvpResult<Vec<u8>> {
        let cipher = self.cipher()?;
        if nonce.len() != NONCE_SIZE {
            return Err(HvpError::corrupt("aead", "nonce has wrong length"));
        }
        let nonce = Nonce::from_slice(nonce);

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: aad.unwrap_or(&[]),
                },
            )
            .map_err(|_| HvpError::bad_password("aead payload"))
    }

    /// Best-effort zeroization of the derived key. Subsequent calls to
    /// [`Self::encrypt`]/[`Self::decrypt`] fail.
    pub fn clear(&mut self) {
        if let Some(mut key) = self.key.take() {
            key.zeroize();
        }
    }

    fn cipher(&self) -> HvpResult<Aes256Gcm> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| HvpError::corrupt("aead", "key has been cleared"))?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice())))
    }
}

impl std::fmt::Debug for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Security")
            .field("salt", &"[redacted]")
            .field("kdf_params", &self.kdf_params)
            .field("key_present", &self.key.is_some())
            .finish()
    }
}

impl Drop for Security {
    fn drop(&mut self) {
        self.clear();
    }
}
