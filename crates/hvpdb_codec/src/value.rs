//! Dynamic document value type.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A dynamic, JSON-like document value.
///
/// This is the tagged sum type every document field, query value, and
/// WAL before/after image is built from: `Null`, `Bool`, `Int`, `Float`,
/// `String`, `Bytes`, `Array<Value>`, `Map<String, Value>`. It round-trips
/// through MsgPack via [`crate::to_msgpack`] / [`crate::from_msgpack`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Ordered map of string keys to values. Order is insertion order, not
    /// sorted; documents are schemaless records, not canonical wire values.
    Map(Vec<(String, Value)>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                // Deep value equality, independent of field order.
                if a.len() != b.len() {
                    return false;
                }
                a.iter()
                    .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            // Int/Float never compare equal across variants even when numerically
            // identical: the matcher compares by value *and* kind.
            _ => false,
        }
    }
}

impl Value {
    /// Builds a map value from ordered pairs, preserving insertion order.
    pub fn map(pairs: Vec<(String, Value)>) -> Self {
        Value::Map(pairs)
    }

    /// True if this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the boolean, if this is [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float, if this is [`Value::Float`].
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string slice, if this is [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the byte slice, if this is [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the array slice, if this is [`Value::Array`].
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the map pairs, if this is [`Value::Map`].
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the map pairs mutably, if this is [`Value::Map`].
    pub fn as_map_mut(&mut self) -> Option<&mut Vec<(String, Value)>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up `key` in this map value. Returns `None` if not a map, or the
    /// key is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Sets `key` to `value` in this map, overwriting an existing entry or
    /// appending a new one. Panics if `self` is not a map.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let pairs = self.as_map_mut().expect("set() called on non-map Value");
        if let Some(existing) = pairs.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            pairs.push((key, value));
        }
    }

    /// Removes `key` from this map, returning the previous value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pairs = self.as_map_mut()?;
        let idx = pairs.iter().position(|(k, _)| k == key)?;
        Some(pairs.remove(idx).1)
    }

    /// Merges `other`'s fields into `self` field-wise (overwrite semantics),
    /// used by `Group::update`. Both values must be maps.
    pub fn merge_from(&mut self, other: &Value) {
        if let (Some(_), Some(other_pairs)) = (self.as_map(), other.as_map()) {
            for (k, v) in other_pairs {
                self.set(k.clone(), v.clone());
            }
        }
    }

    /// Orders values for deterministic test output and stable iteration.
    /// Not used for wire canonicalization — there is no cross-process
    /// determinism requirement on encoding order.
    pub fn cmp_loose(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::Float(_) => 3,
                Value::String(_) => 4,
                Value::Bytes(_) => 5,
                Value::Array(_) => 6,
                Value::Map(_) => 7,
            }
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_get_and_set() {
        let mut v = Value::map(vec![("a".into(), Value::Int(1))]);
        assert_eq!(v.get("a"), Some(&Value::Int(1)));
        v.set("b", Value::Int(2));
        assert_eq!(v.get("b"), Some(&Value::Int(2)));
        v.set("a", Value::Int(9));
        assert_eq!(v.get("a"), Some(&Value::Int(9)));
    }

    #[test]
    fn map_equality_ignores_order() {
        let a = Value::map(vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(2))]);
        let b = Value::map(vec![("y".into(), Value::Int(2)), ("x".into(), Value::Int(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn int_and_float_are_distinct() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn merge_overwrites_fields() {
        let mut a = Value::map(vec![("name".into(), Value::from("old")), ("age".into(), Value::Int(1))]);
        let b = Value::map(vec![("name".into(), Value::from("new"))]);
        a.merge_from(&b);
        assert_eq!(a.get("name"), Some(&Value::from("new")));
        assert_eq!(a.get("age"), Some(&Value::Int(1)));
    }

    #[test]
    fn remove_field() {
        let mut v = Value::map(vec![("a".into(), Value::Int(1))]);
        assert_eq!(v.remove("a"), Some(Value::Int(1)));
        assert_eq!(v.get("a"), None);
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Int(42));
        assert_eq!(Value::from("hi"), Value::String("hi".to_string()));
        assert_eq!(Value::from(()), Value::Null);
    }
}
