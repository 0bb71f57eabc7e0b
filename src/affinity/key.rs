//! Affinity-key resolution (spec.md §4.3, steps 1-3).

use std::any::Any;
use std::collections::HashMap;

use crate::codec::{KeyValue, ObjectCodec};
use crate::types::TypeCode;

/// Per-type-id affinity field configuration for one cache, as carried in a
/// `PartitionAwarenessCacheGroup` entry (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct KeyConfig {
    /// `keyTypeId -> affinityKeyFieldId` (spec.md §3).
    pub affinity_fields: HashMap<i32, i32>,
}

/// A composite key presented as a binary-object: a type id plus its
/// fields, keyed by field id. The core never interprets field contents
/// beyond extraction; encoding/decoding is the codec's job.
#[derive(Debug, Clone)]
pub struct BinaryObjectKey {
    pub type_id: i32,
    pub fields: HashMap<i32, (KeyValue, TypeCode)>,
}

/// Anything the router can resolve an affinity key from: either a plain
/// value (hashed directly) or a binary-object key (whose configured field
/// may itself be the affinity key).
pub enum KeyInput {
    Plain(KeyValue, TypeCode),
    BinaryObject(BinaryObjectKey),
}

/// Resolve `(affinity_key, affinity_type_code, hash)` per spec.md §4.3.
///
/// Step 2's "may short-circuit by reading the field directly from the
/// in-memory structure" permission (spec.md §9 Open Questions) is taken:
/// [`BinaryObjectKey`] already holds decoded fields, so there is no
/// serialize-then-extract round trip.
pub fn resolve_affinity_key(
    input: &KeyInput,
    key_config: Option<&KeyConfig>,
    codec: &dyn ObjectCodec,
) -> (KeyValue, TypeCode, i32) {
    match input {
        KeyInput::Plain(value, type_code) => {
            let hash = codec.hash_code(value, *type_code);
            (value.clone(), *type_code, hash)
        }
        KeyInput::BinaryObject(obj) => {
            let field = key_config.and_then(|cfg| cfg.affinity_fields.get(&obj.type_id));
            match field.and_then(|field_id| obj.fields.get(field_id)) {
                Some((value, type_code)) => {
                    let hash = codec.hash_code(value, *type_code);
                    (value.clone(), *type_code, hash)
                }
                None => {
                    // No configured field, or field missing: affinity key
                    // is the whole object (spec.md §4.3 step 2).
                    let whole = whole_object_bytes(obj, codec);
                    let value = KeyValue::Opaque(whole);
                    let hash = codec.hash_code(&value, TypeCode::ComplexObject);
                    (value, TypeCode::ComplexObject, hash)
                }
            }
        }
    }
}

fn whole_object_bytes(obj: &BinaryObjectKey, codec: &dyn ObjectCodec) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&obj.type_id.to_le_bytes());
    let mut field_ids: Vec<_> = obj.fields.keys().copied().collect();
    field_ids.sort_unstable();
    for id in field_ids {
        let (value, type_code) = &obj.fields[&id];
        let _ = codec.write_object(&mut buf, value, *type_code);
    }
    buf
}

/// Infer the server type code for a key supplied without an explicit type
/// hint (spec.md §4.3 step 1).
pub fn infer_type_code(value: &dyn Any, codec: &dyn ObjectCodec) -> TypeCode {
    codec.type_code_for(value)
}
