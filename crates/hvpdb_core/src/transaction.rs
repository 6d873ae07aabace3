//! Explicit, scoped transactions (§4.3, §6).
//!
//! [`Transaction`] is the buffered counterpart to [`crate::group::Group`]'s
//! ambient-transaction participation: writes made through
//! [`TransactionGroup`] are held in memory and only turned into WAL records
//! (and applied to the live document store) at [`Transaction::commit`].
//! Reads (`find`/`find_one`) always see the group's current committed state,
//! not the transaction's own uncommitted buffer.
//!
//! A [`Transaction`] dropped without an explicit [`commit`](Transaction::commit)
//! or [`rollback`](Transaction::rollback) rolls back automatically, the same
//! discipline [`crate::lock::LockGuard`] uses for locks.

use crate::error::HvpResult;
use crate::group::{Group, Query};
use crate::storage::Storage;
use crate::wal::Operation;
use hvpdb_codec::Value;
use std::sync::Arc;

struct PendingOp {
    op: Operation,
    group: String,
    id: String,
    data: Value,
}

/// A transaction open against one [`crate::database::Database`].
pub struct Transaction {
    storage: Arc<Storage>,
    txn_id: String,
    ops: Vec<PendingOp>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(storage: Arc<Storage>) -> HvpResult<Self> {
        let txn_id = storage.begin_txn()?;
        Ok(Self {
            storage,
            txn_id,
            ops: Vec::new(),
            finished: false,
        })
    }

    /// This transaction's id, as recorded in the WAL.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.txn_id
    }

    /// Returns a buffered-write handle onto `name`. Writes through it are
    /// held until [`Self::commit`]; reads pass straight through to the
    /// group's current state.
    pub fn group<'a>(&'a mut self, name: &str) -> TransactionGroup<'a> {
        let group = Group::new(name, Arc::clone(&self.storage));
        TransactionGroup { txn: self, group }
    }

    /// Applies every buffered write (in order), each logged under this
    /// transaction's id, then writes the COMMIT record.
    pub fn commit(mut self) -> HvpResult<()> {
        let ops = std::mem::take(&mut self.ops);
        for op in ops {
            match op.op {
                Operation::Insert => {
                    self.storage.apply_insert(&self.txn_id, &op.group, &op.id, op.data)?;
                }
                Operation::Update => {
                    let before = self
                        .storage
                        .with_group(&op.group, |g| g.documents().get(&op.id).cloned())
                        .unwrap_or(Value::Null);
                    self.storage.apply_update(&self.txn_id, &op.group, &op.id, before, op.data)?;
                }
                Operation::Delete => {
                    let before = self
                        .storage
                        .with_group(&op.group, |g| g.documents().get(&op.id).cloned())
                        .unwrap_or_else(|| op.data.clone());
                    self.storage.apply_delete(&self.txn_id, &op.group, &op.id, before)?;
                }
            }
        }
        self.storage.commit_txn(&self.txn_id)?;
        self.finished = true;
        Ok(())
    }

    /// Discards every buffered write and writes the ROLLBACK record. Since
    /// nothing was applied to memory yet, no refresh is needed beyond what
    /// [`crate::storage::Storage::rollback_txn`] itself does.
    pub fn rollback(mut self) -> HvpResult<()> {
        self.ops.clear();
        self.storage.rollback_txn(&self.txn_id)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.storage.rollback_txn(&self.txn_id) {
                tracing::warn!(error = %e, txn = %self.txn_id, "failed to roll back abandoned transaction");
            }
        }
    }
}

/// A buffered-write handle onto one group, scoped to a [`Transaction`].
pub struct TransactionGroup<'a> {
    txn: &'a mut Transaction,
    group: Group,
}

impl TransactionGroup<'_> {
    /// Buffers an insert; not visible to `find` until the transaction
    /// commits.
    pub fn insert(&mut self, mut data: Value) -> Value {
        let id = match data.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                data.set("_id", Value::from(id.clone()));
                id
            }
        };
        data.set("_created_at", Value::Float(now_unix()));
        self.txn.ops.push(PendingOp {
            op: Operation::Insert,
            group: self.group.name().to_string(),
            id,
            data: data.clone(),
        });
        data
    }

    /// Buffers an update for every document currently matching `query`.
    /// Returns the number of documents queued.
    pub fn update(&mut self, query: &Query, patch: &Value) -> usize {
        let docs = self.group.find(query);
        let mut count = 0;
        for before in docs {
            let Some(id) = before.get("_id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let mut after = before.clone();
            after.merge_from(patch);
            after.set("_updated_at", Value::Float(now_unix()));
            self.txn.ops.push(PendingOp {
                op: Operation::Update,
                group: self.group.name().to_string(),
                id,
                data: after,
            });
            count += 1;
        }
        count
    }

    /// Buffers a delete for every document currently matching `query`.
    /// Returns the number of documents queued.
    pub fn delete(&mut self, query: &Query) -> usize {
        let docs = self.group.find(query);
        let mut count = 0;
        for doc in docs {
            let Some(id) = doc.get("_id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            self.txn.ops.push(PendingOp {
                op: Operation::Delete,
                group: self.group.name().to_string(),
                id,
                data: doc,
            });
            count += 1;
        }
        count
    }

    /// Current committed state, ignoring this transaction's own buffer.
    #[must_use]
    pub fn find(&self, query: &Query) -> Vec<Value> {
        self.group.find(query)
    }

    /// Current committed state, ignoring this transaction's own buffer.
    #[must_use]
    pub fn find_one(&self, query: &Query) -> Option<Value> {
        self.group.find_one(query)
    }
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use tempfile::tempdir;

    fn open_db(dir: &std::path::Path) -> Arc<Storage> {
        Arc::new(Storage::open(dir.join("db.hvp"), b"pw", &Options::default()).unwrap())
    }

    #[test]
    fn buffered_insert_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let storage = open_db(dir.path());
        let mut txn = Transaction::new(Arc::clone(&storage)).unwrap();

        txn.group("users").insert(Value::map(vec![("name".into(), Value::from("alice"))]));
        assert!(txn.group("users").find(&vec![]).is_empty());

        txn.commit().unwrap();

        let group = Group::new("users", storage);
        assert_eq!(group.find(&vec![]).len(), 1);
    }

    #[test]
    fn rollback_discards_buffered_ops() {
        let dir = tempdir().unwrap();
        let storage = open_db(dir.path());
        let mut txn = Transaction::new(Arc::clone(&storage)).unwrap();
        txn.group("users").insert(Value::from(1));
        txn.rollback().unwrap();

        let group = Group::new("users", storage);
        assert!(group.find(&vec![]).is_empty());
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let dir = tempdir().unwrap();
        let storage = open_db(dir.path());
        {
            let mut txn = Transaction::new(Arc::clone(&storage)).unwrap();
            txn.group("users").insert(Value::from(1));
        }
        let group = Group::new("users", storage);
        assert!(group.find(&vec![]).is_empty());
    }

    #[test]
    fn ambient_group_writes_apply_immediately_inside_transaction() {
        let dir = tempdir().unwrap();
        let storage = open_db(dir.path());
        let txn = Transaction::new(Arc::clone(&storage)).unwrap();

        let group = Group::new("users", Arc::clone(&storage));
        group.insert(Value::from(1)).unwrap();
        assert_eq!(group.find(&vec![]).len(), 1);

        txn.commit().unwrap();
    }
}
