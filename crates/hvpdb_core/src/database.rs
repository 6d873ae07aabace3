//! The top-level database facade (§3, §9).

use crate::config::Options;
use crate::error::{HvpError, HvpResult};
use crate::group::Group;
use crate::storage::Storage;
use crate::transaction::Transaction;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use hvpdb_codec::Value;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Reserved group name holding user accounts (§B.5). Not a valid
/// user-supplied group name (see [`validate_group_name`]).
const USERS_GROUP: &str = "_users";

/// The database engine's public entry point: open a file, get [`Group`]
/// handles, commit, and manage transactions and users.
pub struct Database {
    storage: Arc<Storage>,
    current_user: RwLock<Option<String>>,
}

impl Database {
    /// Opens (and, per `options.create_if_missing`, creates) the database
    /// at `path`. `path` has `.hvp` appended if it has neither that suffix
    /// nor `.hvdb` already; `.hvdb` (clustered/sharded deployment) is not
    /// supported by this engine.
    ///
    /// On first open, creates a root user (`role: admin`, `groups: ["*"]`,
    /// no password set — the account exists to be granted a password via
    /// [`Self::set_user_password`] before the database is exposed to
    /// untrusted callers).
    ///
    /// # Errors
    ///
    /// Returns [`HvpError::AuthRequired`] if `password` is empty — this
    /// engine has no notion of an unencrypted database, so an absent
    /// password can never open one (§7).
    pub fn open(path: impl AsRef<Path>, password: &[u8], options: Options) -> HvpResult<Self> {
        if password.is_empty() {
            return Err(HvpError::AuthRequired);
        }
        let path = normalize_path(path.as_ref())?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let storage = Arc::new(Storage::open(path, password, &options)?);
        let db = Self {
            storage,
            current_user: RwLock::new(None),
        };
        db.ensure_root_user()?;
        Ok(db)
    }

    fn ensure_root_user(&self) -> HvpResult<()> {
        let users = Group::new(USERS_GROUP, Arc::clone(&self.storage));
        if users.get("root").is_some() {
            return Ok(());
        }
        let record = Value::map(vec![
            ("_id".to_string(), Value::from("root")),
            ("role".to_string(), Value::from("admin")),
            ("groups".to_string(), Value::Array(vec![Value::from("*")])),
        ]);
        users.insert(record)?;
        tracing::debug!("bootstrapped root user");
        Ok(())
    }

    /// A handle to the named group, creating it empty on first access.
    ///
    /// # Errors
    ///
    /// Returns [`HvpError::InvalidArgument`] if `name` is empty or contains
    /// any of `\/:*?"<>|`.
    pub fn group(&self, name: &str) -> HvpResult<Group> {
        validate_group_name(name)?;
        Ok(Group::new(name, Arc::clone(&self.storage)))
    }

    /// Every group name with at least one document or index, excluding the
    /// reserved user-account group.
    #[must_use]
    pub fn get_all_groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .storage
            .group_names()
            .into_iter()
            .filter(|n| n != USERS_GROUP)
            .collect();
        names.sort();
        names
    }

    /// Writes a fresh snapshot and truncates the WAL, but only if something
    /// has changed since the last checkpoint (§4.6: "if dirty, run Save").
    /// A `commit()` with no intervening writes is a no-op.
    pub fn commit(&self) -> HvpResult<()> {
        if self.storage.is_dirty() {
            self.storage.checkpoint()?;
        }
        Ok(())
    }

    /// Reloads in-memory state. See [`Storage::refresh`] for the
    /// `force` semantics.
    pub fn refresh(&self, force: bool) -> HvpResult<()> {
        self.storage.refresh(force)
    }

    /// Commits a final snapshot. The [`Storage`]'s [`crate::crypto::Security`]
    /// zeroizes its key on drop regardless of whether this is called.
    pub fn close(self) -> HvpResult<()> {
        self.commit()
    }

    /// Opens a new explicit [`Transaction`].
    pub fn begin(&self) -> HvpResult<Transaction> {
        Transaction::new(Arc::clone(&self.storage))
    }

    /// Replays the entire WAL (ignoring the snapshot's sequence cursor) and
    /// returns applied entries newest-first, truncated to `limit`. A
    /// read-only diagnostic: it never touches in-memory state.
    pub fn audit_log(&self, group: Option<&str>, id: Option<&str>, limit: usize) -> HvpResult<Vec<crate::wal::WalRecord>> {
        self.storage.read_audit_log(group, id, limit)
    }

    /// The username last successfully [`authenticate`](Self::authenticate)d
    /// against this handle, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        self.current_user.read().clone()
    }

    /// Hashes `password` for storage, always via Argon2id (PHC string
    /// format). Verification supports two additional legacy formats for
    /// backward compatibility (§B.5).
    ///
    /// # Errors
    ///
    /// Returns [`HvpError::InvalidArgument`] if `password` is empty — a
    /// persisted user account must never be created with a blank password
    /// (the bootstrap `root` user is the one exception, and it bypasses
    /// this function entirely until [`Self::set_user_password`] is called).
    /// Returns [`HvpError::Corrupt`] if Argon2 hashing itself fails (out of
    /// memory, invalid parameters).
    pub fn hash_user_password(password: &str) -> HvpResult<String> {
        if password.is_empty() {
            return Err(HvpError::invalid_argument("user password must not be empty"));
        }
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| HvpError::corrupt("password hash", e.to_string()))
    }

    /// Sets or replaces `username`'s password hash. Only an administrator
    /// should be calling this in practice; the engine itself does not check
    /// the caller's role (that is `check_permission`'s concern for callers
    /// that want it, per §4.6).
    ///
    /// # Errors
    ///
    /// Returns [`HvpError::NotFound`] if `username` has no account, or
    /// whatever [`Self::hash_user_password`] returns for an empty password.
    pub fn set_user_password(&self, username: &str, password: &str) -> HvpResult<()> {
        let users = Group::new(USERS_GROUP, Arc::clone(&self.storage));
        if users.get(username).is_none() {
            return Err(HvpError::not_found(format!("user '{username}'")));
        }
        let hash = Self::hash_user_password(password)?;
        users.update(
            &vec![("_id".to_string(), Value::from(username))],
            &Value::map(vec![("password_hash".to_string(), Value::from(hash))]),
        )?;
        Ok(())
    }

    /// Creates a user account under [`USERS_GROUP`]. `groups` of `["*"]`
    /// grants access to every group regardless of name.
    pub fn create_user(&self, username: &str, password: &str, role: &str, groups: Vec<String>) -> HvpResult<Value> {
        let users = Group::new(USERS_GROUP, Arc::clone(&self.storage));
        let hash = Self::hash_user_password(password)?;
        let record = Value::map(vec![
            ("_id".to_string(), Value::from(username)),
            ("role".to_string(), Value::from(role)),
            (
                "groups".to_string(),
                Value::Array(groups.into_iter().map(Value::from).collect()),
            ),
            ("password_hash".to_string(), Value::from(hash)),
        ]);
        users.insert(record)
    }

    /// Verifies `username`/`password` against the stored hash and, on
    /// success, records `username` as this handle's current user.
    #[must_use]
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let users = Group::new(USERS_GROUP, Arc::clone(&self.storage));
        let Some(user) = users.get(username) else {
            return false;
        };
        let Some(stored) = user.get("password_hash").and_then(Value::as_str) else {
            return false;
        };
        if verify_password(stored, password) {
            *self.current_user.write() = Some(username.to_string());
            true
        } else {
            false
        }
    }

    /// Whether `username` may access `group_name`: admins always may;
    /// everyone else needs `group_name` (or `"*"`) in their `groups` list.
    #[must_use]
    pub fn check_permission(&self, username: &str, group_name: &str) -> bool {
        let users = Group::new(USERS_GROUP, Arc::clone(&self.storage));
        let Some(user) = users.get(username) else {
            return false;
        };
        if user.get("role").and_then(Value::as_str) == Some("admin") {
            return true;
        }
        match user.get("groups").and_then(Value::as_array) {
            Some(groups) => groups
                .iter()
                .any(|g| g.as_str() == Some(group_name) || g.as_str() == Some("*")),
            None => false,
        }
    }
}

fn validate_group_name(name: &str) -> HvpResult<()> {
    const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
    if name.is_empty() || name.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(HvpError::invalid_argument(format!("invalid group name: '{name}'")));
    }
    Ok(())
}

fn normalize_path(path: &Path) -> HvpResult<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HvpError::invalid_argument("database path has no file name"))?;

    if name.ends_with(".hvdb") {
        return Err(HvpError::unsupported("clustered database (.hvdb)", 0));
    }
    if name.ends_with(".hvp") {
        return Ok(path.to_path_buf());
    }
    Ok(path.with_file_name(format!("{name}.hvp")))
}

/// Verifies `password` against `stored`, trying (in order): Argon2id PHC
/// string, `scrypt$<salt-hex>$<key-hex>`, and a legacy `<16-hex-salt>$<sha256-hex>`
/// format, all via constant-time comparison (§B.5).
fn verify_password(stored: &str, password: &str) -> bool {
    if stored.starts_with("$argon2") {
        return PasswordHash::new(stored)
            .ok()
            .is_some_and(|hash| Argon2::default().verify_password(password.as_bytes(), &hash).is_ok());
    }

    if let Some(rest) = stored.strip_prefix("scrypt$") {
        let mut parts = rest.splitn(2, '$');
        let (Some(salt_hex), Some(key_hex)) = (parts.next(), parts.next()) else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex_decode(salt_hex), hex_decode(key_hex)) else {
            return false;
        };
        let params = scrypt::Params::new(14, 8, 1, expected.len()).unwrap_or(scrypt::Params::RECOMMENDED);
        let mut actual = vec![0u8; expected.len()];
        if scrypt::scrypt(password.as_bytes(), &salt, &params, &mut actual).is_err() {
            return false;
        }
        return actual.ct_eq(&expected).into();
    }

    if let Some((salt, expected_hex)) = stored.split_once('$') {
        if salt.len() == 16 {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(salt.as_bytes());
            hasher.update(password.as_bytes());
            let digest = hasher.finalize();
            let actual_hex = hex_encode(&digest);
            return actual_hex.as_bytes().ct_eq(expected_hex.as_bytes()).into();
        }
    }

    false
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
