//! A named collection of schemaless documents (§4.4, §4.5).
//!
//! [`Group`] is a thin facade over [`crate::storage::Storage`]: it owns no
//! state of its own beyond a name and a handle back to the storage layer,
//! matching `find` queries and driving the index-aware lookup path before
//! falling back to a full scan.
//!
//! `insert` checks for an ambient open transaction ([`Storage::current_txn`])
//! before opening its own; `update` and `delete` always open their own
//! transaction regardless of one already being open. This asymmetry is
//! intentional rather than an oversight to "fix" into symmetry, and is
//! covered by tests in `tests/`.

use crate::error::HvpResult;
use crate::storage::Storage;
use hvpdb_codec::Value;
use std::sync::Arc;

/// A query is a set of exact-match field constraints.
pub type Query = Vec<(String, Value)>;

/// A handle to one named group of documents within an open [`crate::database::Database`].
pub struct Group {
    name: String,
    storage: Arc<Storage>,
}

impl Group {
    pub(crate) fn new(name: impl Into<String>, storage: Arc<Storage>) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }

    /// This group's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a secondary index on `field`, unique or not. Building a
    /// unique index over existing documents with a duplicate value fails
    /// without adding the index.
    pub fn create_index(&self, field: &str, unique: bool) -> HvpResult<()> {
        self.storage.with_group_mut(&self.name, |g| g.create_index(field, unique))
    }

    /// Finds every document matching every field in `query`. An empty
    /// query matches everything in the group.
    #[must_use]
    pub fn find(&self, query: &Query) -> Vec<Value> {
        self.storage.with_group(&self.name, |g| {
            if query.is_empty() {
                return g.documents().values().cloned().collect();
            }

            if query.len() == 1 && query[0].0 == "_id" {
                let id = query[0].1.as_str();
                return id
                    .and_then(|id| g.documents().get(id))
                    .cloned()
                    .into_iter()
                    .collect();
            }

            // A unique-indexed field in the query short-circuits: at most
            // one document can match it, and if the exact value is absent
            // from the index no document can match the whole query either.
            for (field, value) in query {
                if g.index_kind(field) == Some(true) {
                    return match g.index_lookup(field, value) {
                        Some(ids) => ids
                            .into_iter()
                            .filter_map(|id| g.documents().get(&id).cloned())
                            .filter(|doc| matches(doc, query))
                            .collect(),
                        None => Vec::new(),
                    };
                }
            }

            // Intersect candidate id sets from every non-unique indexed
            // field present in the query; any indexed-but-absent value
            // rules out the whole query immediately.
            let mut candidates: Option<std::collections::HashSet<String>> = None;
            for (field, value) in query {
                if g.index_kind(field) == Some(false) {
                    let Some(ids) = g.index_lookup(field, value) else {
                        return Vec::new();
                    };
                    candidates = Some(match candidates {
                        Some(existing) => existing.intersection(&ids).cloned().collect(),
                        None => ids,
                    });
                }
            }

            match candidates {
                Some(ids) => ids
                    .into_iter()
                    .filter_map(|id| g.documents().get(&id).cloned())
                    .filter(|doc| matches(doc, query))
                    .collect(),
                None => g
                    .documents()
                    .values()
                    .filter(|doc| matches(doc, query))
                    .cloned()
                    .collect(),
            }
        })
    }

    /// The first document matching `query`, if any.
    #[must_use]
    pub fn find_one(&self, query: &Query) -> Option<Value> {
        self.find(query).into_iter().next()
    }

    /// Number of documents matching `query`.
    #[must_use]
    pub fn count(&self, query: &Query) -> usize {
        self.find(query).len()
    }

    /// Every document in the group.
    #[must_use]
    pub fn get_all(&self) -> Vec<Value> {
        self.storage.with_group(&self.name, |g| g.documents().values().cloned().collect())
    }

    /// Inserts `data`, assigning a `_id` (random UUID) if absent and
    /// stamping `_created_at`. Participates in the caller's ambient
    /// transaction if one is open; otherwise opens and closes its own.
    pub fn insert(&self, mut data: Value) -> HvpResult<Value> {
        let id = match data.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                data.set("_id", Value::from(id.clone()));
                id
            }
        };
        data.set("_created_at", Value::Float(now_unix()));

        let ambient = self.storage.current_txn();
        let (txn_id, is_implicit) = match ambient {
            Some(txn) => (txn, false),
            None => (self.storage.begin_txn()?, true),
        };

        match self.storage.apply_insert(&txn_id, &self.name, &id, data.clone()) {
            Ok(()) => {
                if is_implicit {
                    self.storage.commit_txn(&txn_id)?;
                }
                Ok(data)
            }
            Err(e) => {
                if is_implicit {
                    self.storage.rollback_txn(&txn_id)?;
                }
                Err(e)
            }
        }
    }

    /// Merges `patch`'s fields into every document matching `query`,
    /// stamping `_updated_at`. Always opens its own transaction. Returns
    /// the number of documents modified.
    pub fn update(&self, query: &Query, patch: &Value) -> HvpResult<usize> {
        let docs = self.find(query);
        if docs.is_empty() {
            return Ok(0);
        }

        let txn_id = self.storage.begin_txn()?;
        let mut count = 0usize;
        for before in &docs {
            let Some(id) = before.get("_id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let mut after = before.clone();
            after.merge_from(patch);
            after.set("_updated_at", Value::Float(now_unix()));

            if let Err(e) = self.storage.apply_update(&txn_id, &self.name, &id, before.clone(), after) {
                self.storage.rollback_txn(&txn_id)?;
                return Err(e);
            }
            count += 1;
        }
        self.storage.commit_txn(&txn_id)?;
        Ok(count)
    }

    /// Removes every document matching `query`. Always opens its own
    /// transaction. Returns the number of documents removed.
    pub fn delete(&self, query: &Query) -> HvpResult<usize> {
        let docs = self.find(query);
        if docs.is_empty() {
            return Ok(0);
        }

        let txn_id = self.storage.begin_txn()?;
        let mut count = 0usize;
        for before in &docs {
            let Some(id) = before.get("_id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if let Err(e) = self.storage.apply_delete(&txn_id, &self.name, &id, before.clone()) {
                self.storage.rollback_txn(&txn_id)?;
                return Err(e);
            }
            count += 1;
        }
        self.storage.commit_txn(&txn_id)?;
        Ok(count)
    }

    /// Looks a single document up by `_id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Value> {
        self.storage.with_group(&self.name, |g| g.documents().get(id).cloned())
    }
}

fn matches(doc: &Value, query: &Query) -> bool {
    query.iter().all(|(field, expected)| doc.get(field) == Some(expected))
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
