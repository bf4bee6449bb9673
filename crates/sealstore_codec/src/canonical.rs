//! Deterministic CBOR encoding of serde values.

use crate::error::{CodecError, CodecResult};
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;

/// Encodes a serializable value to deterministic CBOR bytes.
///
/// The value is first lowered to a [`Value`] tree, then every map is sorted
/// by the encoded form of its keys (length-first, then bytewise, as in
/// RFC 8949 section 4.2.1). Two equal records therefore always produce the
/// same bytes regardless of field declaration order.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serde serialization fails.
pub fn encode<T: Serialize + ?Sized>(record: &T) -> CodecResult<Vec<u8>> {
    let value = to_value(record)?;
    encode_value(&value)
}

/// Encodes a dynamic value to deterministic CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the writer fails.
pub fn encode_value(value: &Value) -> CodecResult<Vec<u8>> {
    let canonical = canonicalize(value.clone())?;
    write_value(&canonical)
}

/// Decodes CBOR bytes into `T`.
///
/// Exactly one CBOR item must be present.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] for truncated or structurally
/// invalid input, or input that does not match `T`'s shape, and
/// [`CodecError::TrailingBytes`] if anything follows the item.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = bytes;
    let decoded = ciborium::from_reader(&mut reader)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: reader.len(),
        });
    }
    Ok(decoded)
}

/// Decodes CBOR bytes into a dynamic value.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_value(bytes: &[u8]) -> CodecResult<Value> {
    decode(bytes)
}

/// Lowers a serializable value to a dynamic [`Value`].
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serde serialization fails.
pub fn to_value<T: Serialize + ?Sized>(record: &T) -> CodecResult<Value> {
    Value::serialized(record).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Raises a dynamic [`Value`] into `T`.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the value does not match `T`.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> CodecResult<T> {
    value
        .deserialized()
        .map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Returns a short name for the kind of `value`, for error messages.
#[must_use]
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "integer",
        Value::Bytes(_) => "bytes",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Tag(_, _) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unknown",
    }
}

fn write_value(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

fn canonicalize(value: Value) -> CodecResult<Value> {
    Ok(match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(canonicalize)
                .collect::<CodecResult<Vec<_>>>()?,
        ),
        Value::Map(entries) => {
            let mut keyed = entries
                .into_iter()
                .map(|(key, value)| {
                    let key = canonicalize(key)?;
                    let encoded_key = write_value(&key)?;
                    Ok((encoded_key, key, canonicalize(value)?))
                })
                .collect::<CodecResult<Vec<_>>>()?;
            keyed.sort_by(|a, b| cmp_encoded(&a.0, &b.0));
            Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(canonicalize(*inner)?)),
        other => other,
    })
}

fn cmp_encoded(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
