//! The binary object codec boundary (spec.md §1, "out of scope").
//!
//! The codec is an external collaborator: `encode(value, type) -> bytes`,
//! `decode(bytes, type) -> value`, and a pure `hash_code` function. The
//! core only depends on the [`ObjectCodec`] trait; [`BasicTypeCodec`] is a
//! reference implementation covering the fixed-width/UUID/primitive cases
//! spec.md §4.3 needs for affinity-key hashing, grounded on the
//! fixed-width reader/writer style of the teacher's
//! `src/networking/routing/serialization/binary.rs`.

use std::any::Any;

use crate::error::{ClientError, Result};
use crate::types::TypeCode;

/// An affinity key value extracted from a (possibly composite) cache key.
#[derive(Debug, Clone)]
pub enum KeyValue {
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Boolean(bool),
    String(String),
    Uuid(uuid::Uuid),
    /// Opaque bytes, for complex/binary-object values the core does not
    /// interpret further.
    Opaque(Vec<u8>),
}

/// Pure codec boundary: value <-> wire bytes, plus the hash function the
/// server uses to place a key into a partition.
pub trait ObjectCodec: Send + Sync {
    /// Encode `value` into `buf` using `type_code`.
    fn write_object(&self, buf: &mut Vec<u8>, value: &KeyValue, type_code: TypeCode) -> Result<()>;

    /// Decode a value of `type_code` from `buf`.
    fn read_object(&self, buf: &[u8], type_code: TypeCode) -> Result<KeyValue>;

    /// The server-compatible hash of `value` under `type_code` (spec.md §4.3 step 3).
    fn hash_code(&self, value: &KeyValue, type_code: TypeCode) -> i32;

    /// Infer the [`TypeCode`] for an arbitrary Rust value (spec.md §4.3 step 1).
    fn type_code_for(&self, value: &dyn Any) -> TypeCode {
        if value.is::<i8>() {
            TypeCode::Byte
        } else if value.is::<i16>() {
            TypeCode::Short
        } else if value.is::<i32>() {
            TypeCode::Integer
        } else if value.is::<i64>() {
            TypeCode::Long
        } else if value.is::<f32>() {
            TypeCode::Float
        } else if value.is::<f64>() {
            TypeCode::Double
        } else if value.is::<bool>() {
            TypeCode::Boolean
        } else if value.is::<String>() || value.is::<&str>() {
            TypeCode::String
        } else if value.is::<uuid::Uuid>() {
            TypeCode::Uuid
        } else {
            TypeCode::ComplexObject
        }
    }
}

/// Reference [`ObjectCodec`] covering primitive types, little-endian,
/// matching the wire byte order §6 specifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicTypeCodec;

impl ObjectCodec for BasicTypeCodec {
    fn write_object(&self, buf: &mut Vec<u8>, value: &KeyValue, type_code: TypeCode) -> Result<()> {
        match (type_code, value) {
            (TypeCode::Byte, KeyValue::Byte(v)) => buf.push(*v as u8),
            (TypeCode::Short, KeyValue::Short(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (TypeCode::Integer, KeyValue::Integer(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (TypeCode::Long, KeyValue::Long(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (TypeCode::Float, KeyValue::Float(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (TypeCode::Double, KeyValue::Double(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (TypeCode::Boolean, KeyValue::Boolean(v)) => buf.push(*v as u8),
            (TypeCode::String, KeyValue::String(v)) => {
                buf.extend_from_slice(&(v.len() as i32).to_le_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
            (TypeCode::Uuid, KeyValue::Uuid(v)) => buf.extend_from_slice(v.as_bytes()),
            (TypeCode::BinaryObject | TypeCode::ComplexObject, KeyValue::Opaque(bytes)) => {
                buf.extend_from_slice(bytes)
            }
            _ => {
                return Err(ClientError::SerializationError(format!(
                    "value does not match type code {type_code:?}"
                )))
            }
        }
        Ok(())
    }

    fn read_object(&self, buf: &[u8], type_code: TypeCode) -> Result<KeyValue> {
        let bad = || ClientError::SerializationError(format!("short buffer for {type_code:?}"));
        Ok(match type_code {
            TypeCode::Byte => KeyValue::Byte(*buf.first().ok_or_else(bad)? as i8),
            TypeCode::Short => KeyValue::Short(i16::from_le_bytes(buf.get(0..2).ok_or_else(bad)?.try_into().unwrap())),
            TypeCode::Integer => KeyValue::Integer(i32::from_le_bytes(buf.get(0..4).ok_or_else(bad)?.try_into().unwrap())),
            TypeCode::Long => KeyValue::Long(i64::from_le_bytes(buf.get(0..8).ok_or_else(bad)?.try_into().unwrap())),
            TypeCode::Float => KeyValue::Float(f32::from_le_bytes(buf.get(0..4).ok_or_else(bad)?.try_into().unwrap())),
            TypeCode::Double => KeyValue::Double(f64::from_le_bytes(buf.get(0..8).ok_or_else(bad)?.try_into().unwrap())),
            TypeCode::Boolean => KeyValue::Boolean(*buf.first().ok_or_else(bad)? != 0),
            TypeCode::String => {
                let len = i32::from_le_bytes(buf.get(0..4).ok_or_else(bad)?.try_into().unwrap()) as usize;
                let bytes = buf.get(4..4 + len).ok_or_else(bad)?;
                KeyValue::String(String::from_utf8_lossy(bytes).into_owned())
            }
            TypeCode::Uuid => {
                let bytes: [u8; 16] = buf.get(0..16).ok_or_else(bad)?.try_into().unwrap();
                KeyValue::Uuid(uuid::Uuid::from_bytes(bytes))
            }
            TypeCode::BinaryObject | TypeCode::ComplexObject | TypeCode::Char => {
                KeyValue::Opaque(buf.to_vec())
            }
        })
    }

    fn hash_code(&self, value: &KeyValue, _type_code: TypeCode) -> i32 {
        // Java-style `String.hashCode` / integer-identity hashing, the
        // scheme this cluster family's servers use for primitive keys.
        match value {
            KeyValue::Byte(v) => *v as i32,
            KeyValue::Short(v) => *v as i32,
            KeyValue::Integer(v) => *v,
            KeyValue::Long(v) => ((*v >> 32) ^ *v) as i32,
            KeyValue::Float(v) => v.to_bits() as i32,
            KeyValue::Double(v) => {
                let bits = v.to_bits() as i64;
                ((bits >> 32) ^ bits) as i32
            }
            KeyValue::Char(c) => *c as i32,
            KeyValue::Boolean(v) => {
                if *v {
                    1231
                } else {
                    1237
                }
            }
            KeyValue::String(s) => {
                let mut hash: i32 = 0;
                for c in s.chars() {
                    hash = hash.wrapping_mul(31).wrapping_add(c as i32);
                }
                hash
            }
            KeyValue::Uuid(u) => {
                let (hi, lo) = u.as_u64_pair();
                let xored = (hi as i64) ^ (lo as i64);
                ((xored >> 32) ^ xored) as i32
            }
            KeyValue::Opaque(bytes) => {
                let mut hash: i32 = 1;
                for b in bytes {
                    hash = hash.wrapping_mul(31).wrapping_add(*b as i32);
                }
                hash
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_integer() {
        let codec = BasicTypeCodec;
        let mut buf = Vec::new();
        codec.write_object(&mut buf, &KeyValue::Integer(42), TypeCode::Integer).unwrap();
        let decoded = codec.read_object(&buf, TypeCode::Integer).unwrap();
        assert!(matches!(decoded, KeyValue::Integer(42)));
    }

    #[test]
    fn hash_is_deterministic() {
        let codec = BasicTypeCodec;
        let a = codec.hash_code(&KeyValue::Integer(1337), TypeCode::Integer);
        let b = codec.hash_code(&KeyValue::Integer(1337), TypeCode::Integer);
        assert_eq!(a, b);
    }

    #[test]
    fn string_hash_matches_java_semantics() {
        let codec = BasicTypeCodec;
        // Java's "".hashCode() == 0, "a".hashCode() == 97
        assert_eq!(codec.hash_code(&KeyValue::String(String::new()), TypeCode::String), 0);
        assert_eq!(codec.hash_code(&KeyValue::String("a".to_string()), TypeCode::String), 97);
    }
}
