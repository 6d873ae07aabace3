//! Snapshot + WAL orchestration: the durable half of a database (§4, §5).
//!
//! [`Storage`] owns the one snapshot file and its companion WAL, the
//! derived [`Security`] context, and the in-memory group documents/indexes
//! that both are kept in sync with. [`crate::group::Group`] and
//! [`crate::database::Database`] are thin facades over this.

use crate::config::Options;
use crate::crypto::{KdfParams, Security, NONCE_SIZE, SALT_SIZE};
use crate::error::{HvpError, HvpResult};
use crate::index::IndexSet;
use crate::lock::LockManager;
use crate::wal::{Operation, RecordKind, Wal, WalRecord};
use hvpdb_codec::Value;
use hvpdb_storage::{atomic_replace, read_all_or_empty, write_new_file};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SNAPSHOT_MAGIC: &[u8; 5] = b"HVPDB";
const SNAPSHOT_VERSION: u16 = 2;

/// One group's documents and index definitions, as persisted in a
/// snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GroupRecord {
    documents: HashMap<String, Value>,
    #[serde(default)]
    indexes: Vec<IndexDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexDef {
    field: String,
    unique: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SnapshotBody {
    sequence: u64,
    groups: HashMap<String, GroupRecord>,
}

/// One group's live, in-memory state: its documents and secondary indexes.
pub struct GroupStore {
    documents: HashMap<String, Value>,
    indexes: IndexSet,
    index_defs: Vec<(String, bool)>,
}

impl GroupStore {
    fn new(name: &str) -> Self {
        Self {
            documents: HashMap::new(),
            indexes: IndexSet::new(name),
            index_defs: Vec::new(),
        }
    }

    fn from_record(name: &str, record: GroupRecord) -> HvpResult<Self> {
        let mut store = Self {
            documents: record.documents,
            indexes: IndexSet::new(name),
            index_defs: Vec::new(),
        };
        for def in record.indexes {
            store.rebuild_index(&def.field, def.unique)?;
        }
        Ok(store)
    }

    fn to_record(&self) -> GroupRecord {
        GroupRecord {
            documents: self.documents.clone(),
            indexes: self
                .index_defs
                .iter()
                .map(|(field, unique)| IndexDef {
                    field: field.clone(),
                    unique: *unique,
                })
                .collect(),
        }
    }

    fn rebuild_index(&mut self, field: &str, unique: bool) -> HvpResult<()> {
        let docs = self
            .documents
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()));
        self.indexes.create_index(field, unique, docs)?;
        if !self.index_defs.iter().any(|(f, _)| f == field) {
            self.index_defs.push((field.to_string(), unique));
        }
        Ok(())
    }

    /// Documents in this group, keyed by id.
    #[must_use]
    pub fn documents(&self) -> &HashMap<String, Value> {
        &self.documents
    }

    /// Index lookup, for callers of [`crate::group::Group::find`] that want
    /// to avoid a full scan.
    #[must_use]
    pub fn index_lookup(&self, field: &str, value: &Value) -> Option<std::collections::HashSet<String>> {
        self.indexes.lookup(field, value)
    }

    /// Whether `field` is indexed, and if so whether uniquely.
    #[must_use]
    pub fn index_kind(&self, field: &str) -> Option<bool> {
        self.indexes.kind_of(field)
    }

    /// Declares a new index and builds it from current documents.
    pub fn create_index(&mut self, field: &str, unique: bool) -> HvpResult<()> {
        self.rebuild_index(field, unique)
    }

    fn check_unique_for(&self, doc: &Value, id: &str) -> HvpResult<()> {
        for (field, unique) in &self.index_defs {
            if !*unique {
                continue;
            }
            if let Some(value) = doc.get(field) {
                self.indexes.check_unique(field, value, id)?;
            }
        }
        Ok(())
    }

    fn apply_insert(&mut self, id: &str, doc: Value) {
        self.indexes.index_document(id, &doc);
        self.documents.insert(id.to_string(), doc);
    }

    fn apply_update(&mut self, id: &str, before: Option<&Value>, after: Value) {
        if let Some(before) = before {
            self.indexes.remove_document(id, before);
        }
        self.indexes.index_document(id, &after);
        self.documents.insert(id.to_string(), after);
    }

    fn apply_delete(&mut self, id: &str, before: Option<&Value>) {
        if let Some(before) = before {
            self.indexes.remove_document(id, before);
        }
        self.documents.remove(id);
    }
}

struct Inner {
    sequence: u64,
    groups: HashMap<String, GroupStore>,
    current_txn: Option<String>,
    /// `txn_id -> seq` for a BEGIN that has been reserved but not yet
    /// written to the WAL. Flushed by the first `apply_*` call that
    /// succeeds for that transaction; an entry still here at `commit_txn`
    /// means the transaction never ran a single operation, so there is
    /// nothing on disk to close out either.
    pending_begins: HashMap<String, u64>,
}

/// Owns the snapshot file, WAL, locks, and the live in-memory group state
/// they back.
pub struct Storage {
    snapshot_path: PathBuf,
    wal: Wal,
    lock: LockManager,
    security: Security,
    durable: bool,
    checkpoint_threshold_bytes: u64,
    inner: RwLock<Inner>,
    /// Set whenever a WAL record is appended since the last checkpoint;
    /// cleared by [`Self::checkpoint`]. Lets [`crate::database::Database::commit`]
    /// skip a no-op snapshot rewrite (§4.6).
    dirty: std::sync::atomic::AtomicBool,
}

impl Storage {
    /// Opens (and, if `options.create_if_missing`, creates) the database at
    /// `snapshot_path`, deriving its security context from `password` and
    /// replaying any WAL tail not yet folded into the snapshot.
    pub fn open(snapshot_path: PathBuf, password: &[u8], options: &Options) -> HvpResult<Self> {
        let wal_path = wal_path_for(&snapshot_path);
        let wal = Wal::new(wal_path);
        let lock = LockManager::new(&snapshot_path);

        let exists = snapshot_path.exists();
        if !exists && !options.create_if_missing && wal.len_bytes()? == 0 {
            return Err(HvpError::not_found(snapshot_path.display().to_string()));
        }

        let guard = lock.reader_lock();
        let bytes = read_all_or_empty(&snapshot_path)?;
        drop(guard);

        let (security, body) = if bytes.is_empty() {
            let (salt, kdf) = Wal::read_header(wal.path()).unzip();
            let kdf = kdf.unwrap_or_else(|| KdfParams {
                time_cost: options.kdf_time_cost,
                memory_cost: options.kdf_memory_cost_kib,
                parallelism: options.kdf_parallelism,
            });
            let security = Security::new(password, salt, Some(kdf))?;
            (security, SnapshotBody::default())
        } else {
            let parsed = parse_snapshot(&bytes)?;
            let security = Security::new(password, Some(parsed.salt), Some(parsed.kdf_params))?;
            let plaintext = security.decrypt(&parsed.nonce, &parsed.ciphertext, Some(&parsed.aad))?;
            let decompressed = zstd::stream::decode_all(&plaintext[..])
                .map_err(|e| HvpError::corrupt("snapshot body", e.to_string()))?;
            let body: SnapshotBody = hvpdb_codec::from_msgpack(&decompressed)?;
            (security, body)
        };

        let mut groups = HashMap::new();
        for (name, record) in body.groups {
            groups.insert(name.clone(), GroupStore::from_record(&name, record)?);
        }

        let mut inner = Inner {
            sequence: body.sequence,
            groups,
            current_txn: None,
            pending_begins: HashMap::new(),
        };

        let replayed = wal.replay(inner.sequence, &security, |record| {
            apply_record(&mut inner.groups, &record);
            inner.sequence = inner.sequence.max(record.seq);
        })?;
        tracing::debug!(replayed, "recovered WAL records on open");

        let dirty = replayed > 0;

        Ok(Self {
            snapshot_path,
            wal,
            lock,
            security,
            durable: options.durable,
            checkpoint_threshold_bytes: options.checkpoint_threshold_bytes,
            inner: RwLock::new(inner),
            dirty: std::sync::atomic::AtomicBool::new(dirty),
        })
    }

    /// Reloads group state. If `force`, discards all in-memory state and
    /// rebuilds it from the snapshot plus a full WAL replay — this is what
    /// undoes an aborted transaction's in-memory effects (§4.3, §6). If not
    /// forced, only replays WAL records newer than the last-known sequence
    /// (a cheap incremental catch-up with another writer's commits, absent
    /// in a single-writer-per-process model but kept for API symmetry).
    pub fn refresh(&self, force: bool) -> HvpResult<()> {
        if force {
            let guard = self.lock.reader_lock();
            let bytes = read_all_or_empty(&self.snapshot_path)?;
            drop(guard);

            let body = if bytes.is_empty() {
                SnapshotBody::default()
            } else {
                let parsed = parse_snapshot(&bytes)?;
                let plaintext = self.security.decrypt(&parsed.nonce, &parsed.ciphertext, Some(&parsed.aad))?;
                let decompressed = zstd::stream::decode_all(&plaintext[..])
                    .map_err(|e| HvpError::corrupt("snapshot body", e.to_string()))?;
                hvpdb_codec::from_msgpack(&decompressed)?
            };

            let mut groups = HashMap::new();
            for (name, record) in body.groups {
                groups.insert(name.clone(), GroupStore::from_record(&name, record)?);
            }

            let mut inner = self.inner.write();
            inner.groups = groups;
            inner.sequence = body.sequence;
            inner.current_txn = None;
            inner.pending_begins.clear();
            let security = &self.security;
            let replayed = self.wal.replay(inner.sequence, security, |record| {
                apply_record(&mut inner.groups, &record);
                inner.sequence = inner.sequence.max(record.seq);
            })?;
            tracing::debug!(replayed, "forced refresh replayed WAL");
        } else {
            let mut inner = self.inner.write();
            let last_seq = inner.sequence;
            let security = &self.security;
            let replayed = self.wal.replay(last_seq, security, |record| {
                apply_record(&mut inner.groups, &record);
                inner.sequence = inner.sequence.max(record.seq);
            })?;
            if replayed > 0 {
                tracing::debug!(replayed, "incremental refresh replayed WAL");
            }
        }
        Ok(())
    }

    /// Writes a fresh snapshot, then truncates the WAL. The durable
    /// checkpoint operation (§5).
    pub fn checkpoint(&self) -> HvpResult<()> {
        let _writer = self.lock.writer_lock();

        let (body, bytes_salt_header) = {
            let inner = self.inner.read();
            let mut groups = HashMap::new();
            for (name, store) in &inner.groups {
                groups.insert(name.clone(), store.to_record());
            }
            let body = SnapshotBody {
                sequence: inner.sequence,
                groups,
            };
            (body, ())
        };
        let _ = bytes_salt_header;

        let packed = hvpdb_codec::to_msgpack(&body)?;
        let compressed = zstd::stream::encode_all(&packed[..], 3).map_err(HvpError::Io)?;

        let mut header = Vec::with_capacity(5 + 2 + SALT_SIZE + 2);
        header.extend_from_slice(SNAPSHOT_MAGIC);
        header.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
        header.extend_from_slice(&self.security.salt());
        let kdf_bytes = hvpdb_codec::to_msgpack(&self.security.kdf_params())?;
        header.extend_from_slice(&(kdf_bytes.len() as u16).to_be_bytes());
        header.extend_from_slice(&kdf_bytes);

        let (nonce, ciphertext) = self.security.encrypt(&compressed, Some(&header))?;
        let mut file_bytes = header;
        file_bytes.extend_from_slice(&nonce);
        file_bytes.extend_from_slice(&ciphertext);

        let tmp_path = self.snapshot_path.with_extension("tmp");
        write_new_file(&tmp_path, &file_bytes)?;

        {
            let _swap = self.lock.critical_swap_lock();
            atomic_replace(&tmp_path, &self.snapshot_path)?;
            self.wal.truncate(&self.security)?;
        }

        self.dirty.store(false, std::sync::atomic::Ordering::Relaxed);
        tracing::debug!(path = %self.snapshot_path.display(), "checkpoint complete");
        Ok(())
    }

    /// Whether any WAL record has been appended since the last checkpoint.
    /// [`crate::database::Database::commit`] uses this to skip a no-op
    /// snapshot rewrite (§4.6).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Begins a new transaction. The BEGIN record is only reserved a
    /// sequence number here, not written to the WAL yet: it is flushed by
    /// the first `apply_*` call that actually succeeds for this
    /// transaction (§4.4). This is what lets a transaction whose first
    /// operation fails a pre-check — a duplicate unique-index insert, say
    /// — leave the WAL byte-for-byte untouched (§8 property 4b).
    pub fn begin_txn(&self) -> HvpResult<String> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.write();
        let seq = self.next_seq_locked(&mut inner);
        inner.pending_begins.insert(txn_id.clone(), seq);
        inner.current_txn = Some(txn_id.clone());
        Ok(txn_id)
    }

    /// Commits `txn_id`: writes its COMMIT record. In-memory state already
    /// reflects every mutation made under the transaction, so nothing else
    /// changes. If no operation ever ran under this transaction (its BEGIN
    /// is still pending), there is nothing on disk to close out and this is
    /// a pure no-op. Triggers a checkpoint if the WAL has grown past the
    /// configured threshold.
    pub fn commit_txn(&self, txn_id: &str) -> HvpResult<()> {
        let mut inner = self.inner.write();
        inner.current_txn = None;
        if inner.pending_begins.remove(txn_id).is_some() {
            return Ok(());
        }

        let seq = self.next_seq_locked(&mut inner);
        drop(inner);
        self.wal.append(&WalRecord::commit(seq, txn_id), &self.security, self.durable)?;
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);

        if self.checkpoint_threshold_bytes > 0 && self.wal.len_bytes()? >= self.checkpoint_threshold_bytes {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Rolls back `txn_id`. If at least one operation was durably applied
    /// under this transaction, writes a ROLLBACK record for audit and
    /// forces a refresh so in-memory state no longer reflects anything
    /// done under it. If the transaction never got past its (still
    /// pending) BEGIN, nothing was ever written for it, so the rollback is
    /// a pure in-memory discard — nothing is appended to the WAL.
    pub fn rollback_txn(&self, txn_id: &str) -> HvpResult<()> {
        let mut inner = self.inner.write();
        inner.current_txn = None;
        if inner.pending_begins.remove(txn_id).is_some() {
            return Ok(());
        }
        drop(inner);

        let seq = self.next_seq();
        self.wal.append(&WalRecord::rollback(seq, txn_id), &self.security, self.durable)?;
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);
        self.refresh(true)
    }

    /// The currently open transaction id, if any.
    #[must_use]
    pub fn current_txn(&self) -> Option<String> {
        self.inner.read().current_txn.clone()
    }

    /// Inserts `doc` under `id` in `group`, durably logging it under
    /// `txn_id` before mutating memory.
    pub fn apply_insert(&self, txn_id: &str, group: &str, id: &str, doc: Value) -> HvpResult<()> {
        let mut inner = self.inner.write();
        let store = inner.groups.entry(group.to_string()).or_insert_with(|| GroupStore::new(group));
        store.check_unique_for(&doc, id)?;

        if let Some(begin_seq) = inner.pending_begins.remove(txn_id) {
            self.wal.append(&WalRecord::begin(begin_seq, txn_id), &self.security, self.durable)?;
        }

        let seq = self.next_seq_locked(&mut inner);
        let record = WalRecord::data(seq, txn_id, Operation::Insert, group, id, doc.clone(), None);
        self.wal.append(&record, &self.security, self.durable)?;
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);

        inner.groups.get_mut(group).expect("just inserted").apply_insert(id, doc);
        Ok(())
    }

    /// Updates `id` in `group` to `after`, capturing `before` for the WAL
    /// record and index removal.
    pub fn apply_update(&self, txn_id: &str, group: &str, id: &str, before: Value, after: Value) -> HvpResult<()> {
        let mut inner = self.inner.write();
        let store = inner
            .groups
            .get(group)
            .ok_or_else(|| HvpError::not_found(format!("group '{group}'")))?;
        store.check_unique_for(&after, id)?;

        if let Some(begin_seq) = inner.pending_begins.remove(txn_id) {
            self.wal.append(&WalRecord::begin(begin_seq, txn_id), &self.security, self.durable)?;
        }

        let seq = self.next_seq_locked(&mut inner);
        let record = WalRecord::data(seq, txn_id, Operation::Update, group, id, after.clone(), Some(before.clone()));
        self.wal.append(&record, &self.security, self.durable)?;
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);

        inner
            .groups
            .get_mut(group)
            .expect("checked above")
            .apply_update(id, Some(&before), after);
        Ok(())
    }

    /// Deletes `id` from `group`, given its current document as `before`.
    pub fn apply_delete(&self, txn_id: &str, group: &str, id: &str, before: Value) -> HvpResult<()> {
        let mut inner = self.inner.write();

        if let Some(begin_seq) = inner.pending_begins.remove(txn_id) {
            self.wal.append(&WalRecord::begin(begin_seq, txn_id), &self.security, self.durable)?;
        }

        let seq = self.next_seq_locked(&mut inner);
        let record = WalRecord::data(seq, txn_id, Operation::Delete, group, id, Value::Null, Some(before.clone()));
        self.wal.append(&record, &self.security, self.durable)?;
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);

        if let Some(store) = inner.groups.get_mut(group) {
            store.apply_delete(id, Some(&before));
        }
        Ok(())
    }

    /// Runs `f` with read access to `group`'s live state, creating it
    /// empty first if absent.
    pub fn with_group<R>(&self, group: &str, f: impl FnOnce(&GroupStore) -> R) -> R {
        let inner = self.inner.read();
        match inner.groups.get(group) {
            Some(store) => f(store),
            None => f(&GroupStore::new(group)),
        }
    }

    /// Runs `f` with mutable access to `group`'s index definitions,
    /// creating the group first if absent. Marks the store dirty so a
    /// subsequent `commit()` checkpoints and persists the change (§4.5) —
    /// index definitions live only in the snapshot, never the WAL.
    pub fn with_group_mut<R>(&self, group: &str, f: impl FnOnce(&mut GroupStore) -> R) -> R {
        let mut inner = self.inner.write();
        let store = inner.groups.entry(group.to_string()).or_insert_with(|| GroupStore::new(group));
        let result = f(store);
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);
        result
    }

    /// Names of every group that has at least one document or index.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        self.inner.read().groups.keys().cloned().collect()
    }

    /// Replays the entire WAL (ignoring the snapshot's sequence cursor) and
    /// returns DATA records matching `group_name`/`doc_id`, newest first,
    /// truncated to `limit` (§B.5).
    pub fn read_audit_log(&self, group_name: Option<&str>, doc_id: Option<&str>, limit: usize) -> HvpResult<Vec<WalRecord>> {
        let mut matches = Vec::new();
        self.wal.replay_all(&self.security, |record| {
            if record.kind != RecordKind::Data {
                return;
            }
            if let Some(group_name) = group_name {
                if record.g.as_deref() != Some(group_name) {
                    return;
                }
            }
            if let Some(doc_id) = doc_id {
                if record.id.as_deref() != Some(doc_id) {
                    return;
                }
            }
            matches.push(record.clone());
        })?;
        matches.sort_by(|a, b| b.ts.partial_cmp(&a.ts).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    fn next_seq(&self) -> u64 {
        let mut inner = self.inner.write();
        self.next_seq_locked(&mut inner)
    }

    fn next_seq_locked(&self, inner: &mut Inner) -> u64 {
        inner.sequence += 1;
        inner.sequence
    }
}

fn apply_record(groups: &mut HashMap<String, GroupStore>, record: &WalRecord) {
    let (Some(op), Some(group_name), Some(id)) = (record.op, record.g.as_deref(), record.id.as_deref()) else {
        return;
    };
    let store = groups.entry(group_name.to_string()).or_insert_with(|| GroupStore::new(group_name));
    match op {
        Operation::Insert => {
            if let Some(doc) = record.d.clone() {
                store.apply_insert(id, doc);
            }
        }
        Operation::Update => {
            if let Some(doc) = record.d.clone() {
                store.apply_update(id, record.b.as_ref(), doc);
            }
        }
        Operation::Delete => {
            store.apply_delete(id, record.b.as_ref());
        }
    }
}

struct ParsedSnapshot {
    salt: [u8; SALT_SIZE],
    kdf_params: KdfParams,
    aad: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn parse_snapshot(bytes: &[u8]) -> HvpResult<ParsedSnapshot> {
    if bytes.len() < 5 + 2 || &bytes[0..5] != SNAPSHOT_MAGIC {
        return Err(HvpError::corrupt("snapshot", "missing magic"));
    }
    let version = u16::from_be_bytes([bytes[5], bytes[6]]);
    let mut offset = 7usize;

    if bytes.len() < offset + SALT_SIZE {
        return Err(HvpError::corrupt("snapshot", "truncated salt"));
    }
    let salt: [u8; SALT_SIZE] = bytes[offset..offset + SALT_SIZE]
        .try_into()
        .map_err(|_| HvpError::corrupt("snapshot", "bad salt length"))?;
    offset += SALT_SIZE;

    let kdf_params = match version {
        2 => {
            if bytes.len() < offset + 2 {
                return Err(HvpError::corrupt("snapshot", "truncated kdf length"));
            }
            let kdf_len = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]) as usize;
            offset += 2;
            if bytes.len() < offset + kdf_len {
                return Err(HvpError::corrupt("snapshot", "truncated kdf params"));
            }
            let kdf = hvpdb_codec::from_msgpack(&bytes[offset..offset + kdf_len])?;
            offset += kdf_len;
            kdf
        }
        1 => KdfParams::default(),
        other => return Err(HvpError::unsupported("snapshot", other)),
    };

    let aad = bytes[..offset].to_vec();

    if bytes.len() < offset + NONCE_SIZE {
        return Err(HvpError::corrupt("snapshot", "truncated nonce"));
    }
    let nonce = bytes[offset..offset + NONCE_SIZE].to_vec();
    offset += NONCE_SIZE;
    let ciphertext = bytes[offset..].to_vec();

    Ok(ParsedSnapshot {
        salt,
        kdf_params,
        aad,
        nonce,
        ciphertext,
    })
}

fn wal_path_for(snapshot_path: &Path) -> PathBuf {
    let mut p = snapshot_path.as_os_str().to_owned();
    p.push(".log");
    PathBuf::from(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path, name: &str, password: &[u8]) -> Storage {
        Storage::open(dir.join(name), password, &Options::default()).unwrap()
    }

    #[test]
    fn insert_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.hvp");
        {
            let storage = open(dir.path(), "db.hvp", b"pw");
            let txn = storage.begin_txn().unwrap();
            storage
                .apply_insert(&txn, "users", "u1", Value::map(vec![("name".into(), Value::from("alice"))]))
                .unwrap();
            storage.commit_txn(&txn).unwrap();
        }
        let storage = Storage::open(path, b"pw", &Options::default()).unwrap();
        storage.with_group("users", |g| {
            assert!(g.documents().contains_key("u1"));
        });
    }

    #[test]
    fn rollback_discards_in_memory_changes() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path(), "db.hvp", b"pw");

        let txn = storage.begin_txn().unwrap();
        storage.apply_insert(&txn, "users", "u1", Value::from(1)).unwrap();
        storage.with_group("users", |g| assert!(g.documents().contains_key("u1")));

        storage.rollback_txn(&txn).unwrap();
        storage.with_group("users", |g| assert!(!g.documents().contains_key("u1")));
    }

    #[test]
    fn checkpoint_truncates_wal() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path(), "db.hvp", b"pw");

        let txn = storage.begin_txn().unwrap();
        storage.apply_insert(&txn, "users", "u1", Value::from(1)).unwrap();
        storage.commit_txn(&txn).unwrap();

        let before = storage.wal.len_bytes().unwrap();
        storage.checkpoint().unwrap();
        let after = storage.wal.len_bytes().unwrap();
        assert!(after < before);
    }

    #[test]
    fn checkpoint_clears_dirty_flag_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path(), "db.hvp", b"pw");
        assert!(!storage.is_dirty());

        let txn = storage.begin_txn().unwrap();
        storage.apply_insert(&txn, "users", "u1", Value::from(1)).unwrap();
        storage.commit_txn(&txn).unwrap();
        assert!(storage.is_dirty());

        storage.checkpoint().unwrap();
        assert!(!storage.is_dirty());

        let len_after_first = storage.wal.len_bytes().unwrap();
        storage.checkpoint().unwrap();
        let len_after_second = storage.wal.len_bytes().unwrap();
        assert_eq!(len_after_first, len_after_second);
    }

    #[test]
    fn reopen_with_unreplayed_wal_records_is_dirty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.hvp");
        {
            let storage = open(dir.path(), "db.hvp", b"pw");
            let txn = storage.begin_txn().unwrap();
            storage.apply_insert(&txn, "users", "u1", Value::from(1)).unwrap();
            storage.commit_txn(&txn).unwrap();
        }
        let reopened = Storage::open(path, b"pw", &Options::default()).unwrap();
        assert!(reopened.is_dirty());
    }

    #[test]
    fn wrong_password_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.hvp");
        {
            let storage = open(dir.path(), "db.hvp", b"correct");
            storage.checkpoint().unwrap();
        }
        let result = Storage::open(path, b"wrong", &Options::default());
        assert!(result.is_err());
    }

    #[test]
    fn unique_index_blocks_duplicate_insert() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path(), "db.hvp", b"pw");
        storage.with_group_mut("users", |g| g.create_index("email", true)).unwrap();

        let txn = storage.begin_txn().unwrap();
        storage
            .apply_insert(&txn, "users", "u1", Value::map(vec![("email".into(), Value::from("a@x.com"))]))
            .unwrap();
        let result = storage.apply_insert(&txn, "users", "u2", Value::map(vec![("email".into(), Value::from("a@x.com"))]));
        assert!(result.is_err());
    }

    #[test]
    fn audit_log_filters_and_orders_newest_first() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path(), "db.hvp", b"pw");

        let txn = storage.begin_txn().unwrap();
        storage.apply_insert(&txn, "users", "u1", Value::from(1)).unwrap();
        storage.apply_insert(&txn, "orders", "o1", Value::from(2)).unwrap();
        storage.commit_txn(&txn).unwrap();

        let log = storage.read_audit_log(Some("users"), None, 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].g.as_deref(), Some("users"));
    }
}
