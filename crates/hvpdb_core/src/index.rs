//! Secondary indexes over group documents (§4.4).
//!
//! Two flavors, both keyed by field name:
//!
//! - non-unique: `field -> value -> set<doc id>`, used to narrow a [`find`]
//!   scan without a pre-check.
//! - unique: `field -> value -> doc id`, additionally enforced on
//!   insert/update so a duplicate value fails before any WAL write or
//!   in-memory mutation (§4.4, §7).
//!
//! [`find`]: crate::group::Group::find

use crate::error::{HvpError, HvpResult};
use hvpdb_codec::Value;
use std::collections::{HashMap, HashSet};

/// Loose, hashable key derived from a [`Value`] for index bucketing.
///
/// `Value` itself is not `Hash` (floats), so indexes key on this
/// canonicalized form instead; it must agree with [`Value::cmp_loose`] /
/// the custom `PartialEq` on when two values are "the same" for indexing
/// purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Floats are bucketed on their bit pattern; `Float` and `Int` never
    /// collide, matching `Value`'s own equality.
    Float(u64),
    String(String),
    Bytes(Vec<u8>),
    Other(String),
}

impl IndexKey {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(f.to_bits()),
            Value::String(s) => Self::String(s.clone()),
            Value::Bytes(b) => Self::Bytes(b.clone()),
            other => Self::Other(format!("{other:?}")),
        }
    }
}

/// One field's index, either unique or non-unique.
#[derive(Debug, Clone)]
enum FieldIndex {
    Unique(HashMap<IndexKey, String>),
    NonUnique(HashMap<IndexKey, HashSet<String>>),
}

/// The set of secondary indexes maintained for one group.
#[derive(Debug, Clone)]
pub struct IndexSet {
    group: String,
    fields: HashMap<String, FieldIndex>,
}

impl IndexSet {
    /// An empty index set for `group`, used only to name duplicate-key
    /// errors.
    #[must_use]
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            fields: HashMap::new(),
        }
    }

    /// Declares an index on `field`. If `unique`, builds it from `docs`
    /// eagerly and fails if any duplicate value is found; a non-unique
    /// index never fails to build.
    pub fn create_index(
        &mut self,
        field: &str,
        unique: bool,
        docs: impl IntoIterator<Item = (String, Value)>,
    ) -> HvpResult<()> {
        if unique {
            let mut map = HashMap::new();
            for (id, doc) in docs {
                if let Some(value) = doc.get(field) {
                    if value.is_null() {
                        continue;
                    }
                    let key = IndexKey::from_value(value);
                    if let Some(existing) = map.insert(key, id.clone()) {
                        return Err(HvpError::duplicate(
                            self.group.clone(),
                            field,
                            format!("{value:?} (ids {existing} and {id})"),
                        ));
                    }
                }
            }
            self.fields.insert(field.to_string(), FieldIndex::Unique(map));
        } else {
            let mut map: HashMap<IndexKey, HashSet<String>> = HashMap::new();
            for (id, doc) in docs {
                if let Some(value) = doc.get(field) {
                    if value.is_null() {
                        continue;
                    }
                    map.entry(IndexKey::from_value(value)).or_default().insert(id);
                }
            }
            self.fields.insert(field.to_string(), FieldIndex::NonUnique(map));
        }
        Ok(())
    }

    /// Whether `field` has an index, and if so whether it is unique.
    #[must_use]
    pub fn kind_of(&self, field: &str) -> Option<bool> {
        match self.fields.get(field)? {
            FieldIndex::Unique(_) => Some(true),
            FieldIndex::NonUnique(_) => Some(false),
        }
    }

    /// Checks that inserting/updating `id` with `value` on `field`'s unique
    /// index would not collide with a different document. Call this before
    /// any durable write; it never mutates.
    pub fn check_unique(&self, field: &str, value: &Value, id: &str) -> HvpResult<()> {
        if value.is_null() {
            return Ok(());
        }
        if let Some(FieldIndex::Unique(map)) = self.fields.get(field) {
            let key = IndexKey::from_value(value);
            if let Some(existing) = map.get(&key) {
                if existing != id {
                    return Err(HvpError::duplicate(self.group.clone(), field, format!("{value:?}")));
                }
            }
        }
        Ok(())
    }

    /// Records that `id` now has `value` on every indexed field that
    /// applies, replacing any prior entry for `id` on those fields. Call
    /// only after [`Self::check_unique`] has passed for every unique field
    /// touched.
    pub fn index_document(&mut self, id: &str, doc: &Value) {
        for (field, index) in &mut self.fields {
            let Some(value) = doc.get(field) else { continue };
            if value.is_null() {
                continue;
            }
            let key = IndexKey::from_value(value);
            match index {
                FieldIndex::Unique(map) => {
                    map.insert(key, id.to_string());
                }
                FieldIndex::NonUnique(map) => {
                    map.entry(key).or_default().insert(id.to_string());
                }
            }
        }
    }

    /// Removes `id`'s entries from every indexed field, given its last
    /// known document (so the right bucket can be found).
    pub fn remove_document(&mut self, id: &str, doc: &Value) {
        for (field, index) in &mut self.fields {
            let Some(value) = doc.get(field) else { continue };
            if value.is_null() {
                continue;
            }
            let key = IndexKey::from_value(value);
            match index {
                FieldIndex::Unique(map) => {
                    if map.get(&key).is_some_and(|existing| existing == id) {
                        map.remove(&key);
                    }
                }
                FieldIndex::NonUnique(map) => {
                    if let Some(set) = map.get_mut(&key) {
                        set.remove(id);
                        if set.is_empty() {
                            map.remove(&key);
                        }
                    }
                }
            }
        }
    }

    /// Fast-path lookup for an equality match on an indexed field. Returns
    /// `None` if the field is not indexed (the caller should fall back to a
    /// full scan); returns `Some(ids)` (possibly empty) otherwise.
    #[must_use]
    pub fn lookup(&self, field: &str, value: &Value) -> Option<HashSet<String>> {
        let key = IndexKey::from_value(value);
        match self.fields.get(field)? {
            FieldIndex::Unique(map) => Some(map.get(&key).cloned().into_iter().collect()),
            FieldIndex::NonUnique(map) => Some(map.get(&key).cloned().unwrap_or_default()),
        }
    }
}
