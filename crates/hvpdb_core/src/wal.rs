//! Write-ahead log: framed, encrypted, CRC-protected append-only records
//! with transaction-isolated replay (§4.3).

use crate::crypto::{KdfParams, Security};
use crate::error::{HvpError, HvpResult};
use fs2::FileExt;
use hvpdb_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// WAL file magic, written once at the start of a non-empty log.
pub const WAL_MAGIC: &[u8; 6] = b"HVPWAL";
/// The only WAL format version this engine writes.
pub const WAL_VERSION: u16 = 2;
/// Frames with a declared length above this are treated as corruption.
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// The four WAL record kinds (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordKind {
    /// Opens a transaction.
    Begin,
    /// One mutation within a transaction.
    Data,
    /// Closes a transaction, applying all of its buffered DATA records.
    Commit,
    /// Closes a transaction, discarding all of its buffered DATA records.
    Rollback,
}

/// The mutation kind carried by a DATA record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Document inserted.
    Insert,
    /// Document updated in place.
    Update,
    /// Document removed.
    Delete,
}

/// One WAL record payload (after decrypt + decompress).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// Monotonic sequence number assigned by [`crate::storage::Storage`].
    pub seq: u64,
    /// Owning transaction id (UUID string).
    pub txn: String,
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Mutation kind; only present on DATA records.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub op: Option<Operation>,
    /// Group name; only present on DATA records.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub g: Option<String>,
    /// Document id; only present on DATA records.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    /// After-image; only present on DATA records.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub d: Option<Value>,
    /// Before-image, when available; only present on DATA records for
    /// update/delete.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub b: Option<Value>,
    /// Wall-clock time the record was appended, Unix epoch seconds.
    pub ts: f64,
}

impl WalRecord {
    /// Builds a BEGIN record.
    pub fn begin(seq: u64, txn: impl Into<String>) -> Self {
        Self {
            seq,
            txn: txn.into(),
            kind: RecordKind::Begin,
            op: None,
            g: None,
            id: None,
            d: None,
            b: None,
            ts: now_unix(),
        }
    }

    /// Builds a COMMIT record.
    pub fn commit(seq: u64, txn: impl Into<String>) -> Self {
        Self {
            seq,
            txn: txn.into(),
            kind: RecordKind::Commit,
            op: None,
            g: None,
            id: None,
            d: None,
            b: None,
            ts: now_unix(),
        }
    }

    /// Builds a ROLLBACK record.
    pub fn rollback(seq: u64, txn: impl Into<String>) -> Self {
        Self {
            seq,
            txn: txn.into(),
            kind: RecordKind::Rollback,
            op: None,
            g: None,
            id: None,
            d: None,
            b: None,
            ts: now_unix(),
        }
    }

    /// Builds a DATA record.
    #[allow(clippy::too_many_arguments)]
    pub fn data(
        seq: u64,
        txn: impl Into<String>,
        op: Operation,
        group: impl Into<String>,
        id: impl Into<String>,
        after: Value,
        before: Option<Value>,
    ) -> Self {
        Self {
            seq,
            txn: txn.into(),
            kind: RecordKind::Data,
            op: Some(op),
            g: Some(group.into()),
            id: Some(id.into()),
            d: Some(after),
            b: before,
            ts: now_unix(),
        }
    }
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The write-ahead log for one database/group snapshot pair.
#[derive(Debug, Clone)]
pub struct Wal {
    log_path: PathBuf,
}

impl Wal {
    /// Opens (without creating) the WAL at `log_path`.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// The WAL file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Current size of the WAL file in bytes, or 0 if it does not exist.
    pub fn len_bytes(&self) -> HvpResult<u64> {
        match std::fs::metadata(&self.log_path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(HvpError::Io(e)),
        }
    }

    /// Reads the salt/KDF params from an existing WAL's header, if present
    /// and well-formed. Used by `Storage::load` to derive the same key the
    /// WAL was written with when the snapshot file itself is missing.
    pub fn read_header(log_path: &Path) -> Option<([u8; crate::crypto::SALT_SIZE], KdfParams)> {
        let mut file = File::open(log_path).ok()?;
        let mut magic = [0u8; 6];
        file.read_exact(&mut magic).ok()?;
        if &magic != WAL_MAGIC {
            return None;
        }
        let mut version_buf = [0u8; 2];
        file.read_exact(&mut version_buf).ok()?;
        if u16::from_be_bytes(version_buf) != WAL_VERSION {
            return None;
        }
        let mut salt = [0u8; crate::crypto::SALT_SIZE];
        file.read_exact(&mut salt).ok()?;
        let mut kdf_len_buf = [0u8; 2];
        file.read_exact(&mut kdf_len_buf).ok()?;
        let kdf_len = u16::from_be_bytes(kdf_len_buf) as usize;
        let mut kdf_bytes = vec![0u8; kdf_len];
        file.read_exact(&mut kdf_bytes).ok()?;
        let kdf: KdfParams = hvpdb_codec::from_msgpack(&kdf_bytes).ok()?;
        Some((salt, kdf))
    }

    /// Writes the file header if the log is empty; otherwise a no-op.
    pub fn ensure_header(&self, security: &Security) -> HvpResult<()> {
        if self.len_bytes()? > 0 {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.lock_exclusive().ok();
        let result = self.write_header(&mut file, security);
        FileExt::unlock(&file).ok();
        result
    }

    fn write_header(&self, file: &mut File, security: &Security) -> HvpResult<()> {
        if file.metadata()?.len() > 0 {
            return Ok(());
        }
        set_owner_only(file);
        file.write_all(WAL_MAGIC)?;
        file.write_all(&WAL_VERSION.to_be_bytes())?;
        file.write_all(&security.salt())?;
        let kdf_bytes = hvpdb_codec::to_msgpack(&security.kdf_params())?;
        file.write_all(&(kdf_bytes.len() as u16).to_be_bytes())?;
        file.write_all(&kdf_bytes)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Appends a single record, encrypting and framing it.
    ///
    /// If `sync`, flushes and fsyncs before returning (the durability
    /// boundary). The file handle is held under an exclusive lock for the
    /// duration of the write.
    pub fn append(&self, record: &WalRecord, security: &Security, sync: bool) -> HvpResult<()> {
        self.write_batch(std::slice::from_ref(record), security, sync)
    }

    /// Appends every record in `records` as one atomic write, flushing and
    /// fsyncing once at the end if `sync`.
    pub fn write_batch(&self, records: &[WalRecord], security: &Security, sync: bool) -> HvpResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_header(security)?;

        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;
        file.lock_exclusive().ok();

        let result = (|| -> HvpResult<()> {
            for record in records {
                let packed = hvpdb_codec::to_msgpack(record)?;
                let compressed = zstd::stream::encode_all(&packed[..], 3)
                    .map_err(HvpError::Io)?;
                let (nonce, ciphertext) = security.encrypt(&compressed, None)?;

                let mut payload = Vec::with_capacity(nonce.len() + ciphertext.len());
                payload.extend_from_slice(&nonce);
                payload.extend_from_slice(&ciphertext);
                let crc = crc32fast::hash(&payload);

                file.write_all(&crc.to_be_bytes())?;
                file.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
                file.write_all(&payload)?;
            }
            if sync {
                file.flush()?;
                file.sync_all()?;
            }
            Ok(())
        })();

        FileExt::unlock(&file).ok();
        result
    }

    /// Replays every record with `seq > last_seq`, applying committed
    /// transactions in order via `apply`. Returns the number of records
    /// applied.
    ///
    /// Tolerant at the tail: CRC failure, oversized/zero length frames, or a
    /// short final read all stop replay cleanly without raising — this is
    /// the expected shape of a crash mid-write (§7).
    pub fn replay(
        &self,
        last_seq: u64,
        security: &Security,
        mut apply: impl FnMut(WalRecord),
    ) -> HvpResult<u64> {
        if !self.log_path.exists() {
            return Ok(0);
        }
        let mut file = File::open(&self.log_path)?;
        file.lock_shared().ok();
        let count = self.replay_inner(&mut file, security, |r| r.seq > last_seq, &mut apply);
        FileExt::unlock(&file).ok();
        count
    }

    /// Replays the *entire* WAL regardless of `seq`, feeding every record to
    /// `collector` in file order (no transaction filtering). Used for the
    /// read-only audit trail (§B.5); has no effect on in-memory state.
    pub fn replay_all(&self, security: &Security, mut collector: impl FnMut(&WalRecord)) -> HvpResult<()> {
        if !self.log_path.exists() {
            return Ok(());
        }
        let mut file = File::open(&self.log_path)?;
        file.lock_shared().ok();
        let result = self.for_each_frame(&mut file, security, |record| {
            collector(&record);
        });
        FileExt::unlock(&file).ok();
        result.map(|_| ())
    }

    fn replay_inner(
        &self,
        file: &mut File,
        security: &Security,
        should_apply: impl Fn(&WalRecord) -> bool,
        apply: &mut impl FnMut(WalRecord),
    ) -> HvpResult<u64> {
        let mut buffer: HashMap<String, Vec<WalRecord>> = HashMap::new();
        let mut replayed = 0u64;

        self.for_each_frame(file, security, |record| {
            if !should_apply(&record) {
                return;
            }
            match record.kind {
                RecordKind::Begin => {
                    buffer.entry(record.txn.clone()).or_default();
                }
                RecordKind::Data => {
                    buffer.entry(record.txn.clone()).or_default().push(record);
                }
                RecordKind::Commit => {
                    if let Some(pending) = buffer.remove(&record.txn) {
                        for entry in pending {
                            apply(entry);
                            replayed += 1;
                        }
                    }
                }
                RecordKind::Rollback => {
                    buffer.remove(&record.txn);
                }
            }
        })?;

        Ok(replayed)
    }

    /// Iterates frames in file order, decrypting and decoding each, and
    /// calling `visit` for every successfully decoded record. Stops
    /// silently (without error) at the first sign of corruption or a short
    /// tail read, per §7's tolerant-replay policy.
    fn for_each_frame(
        &self,
        file: &mut File,
        security: &Security,
        mut visit: impl FnMut(WalRecord),
    ) -> HvpResult<()> {
        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 6];
        if file.read_exact(&mut magic).is_ok() && &magic == WAL_MAGIC {
            let mut version_buf = [0u8; 2];
            if file.read_exact(&mut version_buf).is_err() {
                return Ok(());
            }
            if u16::from_be_bytes(version_buf) != WAL_VERSION {
                tracing::warn!("WAL version mismatch, treating as corrupt/legacy");
                return Ok(());
            }
            let mut salt = [0u8; crate::crypto::SALT_SIZE];
            if file.read_exact(&mut salt).is_err() {
                return Ok(());
            }
            let mut kdf_len_buf = [0u8; 2];
            if file.read_exact(&mut kdf_len_buf).is_err() {
                return Ok(());
            }
            let kdf_len = u16::from_be_bytes(kdf_len_buf) as usize;
            let mut kdf_bytes = vec![0u8; kdf_len];
            if file.read_exact(&mut kdf_bytes).is_err() {
                return Ok(());
            }
        } else {
            file.seek(SeekFrom::Start(0))?;
        }

        loop {
            let mut header = [0u8; 8];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(_) => break,
            }
            let crc = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            if len == 0 || len > MAX_ENTRY_SIZE {
                tracing::warn!(len, "WAL corruption detected: invalid entry size, stopping replay");
                break;
            }
            let payload_len = crate::crypto::NONCE_SIZE + len as usize;
            let mut payload = vec![0u8; payload_len];
            if file.read_exact(&mut payload).is_err() {
                tracing::warn!("WAL truncated at tail, stopping replay");
                break;
            }
            let computed = crc32fast::hash(&payload);
            if computed != crc {
                tracing::warn!("WAL CRC mismatch, stopping replay");
                break;
            }
            let (nonce, ciphertext) = payload.split_at(crate::crypto::NONCE_SIZE);
            let compressed = match security.decrypt(nonce, ciphertext, None) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "WAL entry decryption failed, stopping replay");
                    break;
                }
            };
            let packed = match zstd::stream::decode_all(&compressed[..]) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "WAL entry decompression failed, stopping replay");
                    break;
                }
            };
            let record: WalRecord = match hvpdb_codec::from_msgpack(&packed) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "WAL entry decode failed, stopping replay");
                    break;
                }
            };
            visit(record);
        }
        Ok(())
    }

    /// Truncates the WAL to zero length and re-writes a fresh header, under
    /// an exclusive lock.
    pub fn truncate(&self, security: &Security) -> HvpResult<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.log_path)?;
        file.lock_exclusive().ok();
        let result = (|| -> HvpResult<()> {
            file.seek(SeekFrom::Start(0))?;
            file.set_len(0)?;
            self.write_header(&mut file, security)
        })();
        FileExt::unlock(&file).ok();
        result
    }
}

fn set_owner_only(file: &File) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = file.metadata() {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            let _ = file.set_permissions(perms);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = file;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sec() -> Security {
        Security::new(b"pw", None, None).unwrap()
    }

    #[test]
    fn append_and_replay_round_trip() {
        let dir = tempdir().unwrap();
        let wal = Wal::new(dir.path().join("db.hvp.log"));
        let security = sec();

        let txn = "t1".to_string();
        wal.write_batch(
            &[
                WalRecord::begin(1, txn.clone()),
                WalRecord::data(2, txn.clone(), Operation::Insert, "users", "u1", Value::Int(1), None),
                WalRecord::commit(3, txn.clone()),
            ],
            &security,
            true,
        )
        .unwrap();

        let mut applied = Vec::new();
        let count = wal.replay(0, &security, |r| applied.push(r)).unwrap();
        assert_eq!(count, 1);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id.as_deref(), Some("u1"));
    }

    #[test]
    fn replay_skips_records_at_or_below_last_seq() {
        let dir = tempdir().unwrap();
        let wal = Wal::new(dir.path().join("db.hvp.log"));
        let security = sec();

        wal.write_batch(
            &[
                WalRecord::begin(1, "t1"),
                WalRecord::data(2, "t1", Operation::Insert, "g", "a", Value::Int(1), None),
                WalRecord::commit(3, "t1"),
            ],
            &security,
            true,
        )
        .unwrap();

        let count = wal.replay(3, &security, |_| panic!("should not apply")).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn uncommitted_transaction_is_discarded() {
        let dir = tempdir().unwrap();
        let wal = Wal::new(dir.path().join("db.hvp.log"));
        let security = sec();

        wal.write_batch(
            &[
                WalRecord::begin(1, "t1"),
                WalRecord::data(2, "t1", Operation::Insert, "g", "a", Value::Int(1), None),
            ],
            &security,
            true,
        )
        .unwrap();

        let mut applied = Vec::new();
        let count = wal.replay(0, &security, |r| applied.push(r)).unwrap();
        assert_eq!(count, 0);
        assert!(applied.is_empty());
    }

    #[test]
    fn rolled_back_transaction_is_discarded() {
        let dir = tempdir().unwrap();
        let wal = Wal::new(dir.path().join("db.hvp.log"));
        let security = sec();

        wal.write_batch(
            &[
                WalRecord::begin(1, "t1"),
                WalRecord::data(2, "t1", Operation::Insert, "g", "a", Value::Int(1), None),
                WalRecord::rollback(3, "t1"),
            ],
            &security,
            true,
        )
        .unwrap();

        let mut applied = Vec::new();
        wal.replay(0, &security, |r| applied.push(r)).unwrap();
        assert!(applied.is_empty());
    }

    #[test]
    fn truncate_resets_to_header_only() {
        let dir = tempdir().unwrap();
        let wal = Wal::new(dir.path().join("db.hvp.log"));
        let security = sec();

        wal.write_batch(
            &[WalRecord::begin(1, "t1"), WalRecord::commit(2, "t1")],
            &security,
            true,
        )
        .unwrap();
        assert!(wal.len_bytes().unwrap() > 0);

        wal.truncate(&security).unwrap();
        let size_after = wal.len_bytes().unwrap();
        assert!(size_after > 0, "header is re-written");

        let count = wal.replay(0, &security, |_| panic!("nothing to replay")).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn corrupt_tail_stops_replay_without_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.hvp.log");
        let wal = Wal::new(&path);
        let security = sec();

        wal.write_batch(
            &[
                WalRecord::begin(1, "t1"),
                WalRecord::data(2, "t1", Operation::Insert, "g", "a", Value::Int(1), None),
                WalRecord::commit(3, "t1"),
                WalRecord::begin(4, "t2"),
                WalRecord::data(5, "t2", Operation::Insert, "g", "b", Value::Int(2), None),
                WalRecord::commit(6, "t2"),
            ],
            &security,
            true,
        )
        .unwrap();

        let full_len = wal.len_bytes().unwrap();
        // Truncate partway through the second transaction's frames.
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 10).unwrap();

        let mut applied = Vec::new();
        let count = wal.replay(0, &security, |r| applied.push(r)).unwrap();
        assert_eq!(count, 1);
        assert_eq!(applied[0].id.as_deref(), Some("a"));
    }

    #[test]
    fn replay_all_ignores_last_seq_filtering() {
        let dir = tempdir().unwrap();
        let wal = Wal::new(dir.path().join("db.hvp.log"));
        let security = sec();

        wal.write_batch(
            &[
                WalRecord::begin(1, "t1"),
                WalRecord::data(2, "t1", Operation::Insert, "g", "a", Value::Int(1), None),
                WalRecord::commit(3, "t1"),
            ],
            &security,
            true,
        )
        .unwrap();

        let mut seen = Vec::new();
        wal.replay_all(&security, |r| seen.push(r.kind)).unwrap();
        assert_eq!(seen, vec![RecordKind::Begin, RecordKind::Data, RecordKind::Commit]);
    }
}
