//! # hvpdb Codec
//!
//! The schemaless document [`Value`] type used throughout hvpdb, and its
//! MsgPack encoding.
//!
//! Documents, query maps, WAL before/after images, and the snapshot body all
//! share this one dynamic value type. Encoding goes straight through
//! `serde`/`rmp-serde`; there is no canonical-ordering requirement here
//! (unlike a content-addressed store, nothing hashes this encoding across
//! processes), so plain derive-based (de)serialization is enough.
//!
//! ## Example
//!
//! ```
//! use hvpdb_codec::{from_msgpack, to_msgpack, Value};
//!
//! let value = Value::map(vec![("name".into(), Value::from("Alice"))]);
//! let bytes = to_msgpack(&value).unwrap();
//! let decoded: Value = from_msgpack(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod value;

pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Encodes any serializable value to MsgPack bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the value cannot be represented.
pub fn to_msgpack<T: serde::Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(CodecError::from)
}

/// Decodes MsgPack bytes into any deserializable value.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if `bytes` is not valid MsgPack for `T`.
pub fn from_msgpack<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    rmp_serde::from_slice(bytes).map_err(CodecError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_scalars() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-7),
            Value::Float(3.5),
            Value::String("hi".into()),
            Value::Bytes(vec![1, 2, 3]),
        ] {
            let bytes = to_msgpack(&value).unwrap();
            let decoded: Value = from_msgpack(&bytes).unwrap();
            assert_eq!(value, decoded);
        }
    }

    #[test]
    fn serde_json_can_render_a_value_for_debugging() {
        // Value's derive(Serialize) is generic over any serde data format, not
        // just rmp-serde — useful for dumping a document to JSON in logs or a
        // debug CLI without a bespoke pretty-printer.
        let value = Value::map(vec![("name".into(), Value::from("Alice")), ("age".into(), Value::Int(30))]);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("Alice"));
    }

    #[test]
    fn roundtrip_nested_document() {
        let value = Value::map(vec![
            ("_id".into(), Value::from("abc")),
            (
                "tags".into(),
                Value::Array(vec![Value::from("a"), Value::from("b")]),
            ),
            (
                "address".into(),
                Value::map(vec![("city".into(), Value::from("NYC"))]),
            ),
        ]);
        let bytes = to_msgpack(&value).unwrap();
        let decoded: Value = from_msgpack(&bytes).unwrap();
        assert_eq!(value, decoded);
    }
}
