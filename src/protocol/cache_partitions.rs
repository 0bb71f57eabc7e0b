//! `CACHE_PARTITIONS` request/response (spec.md §4.3 "Refresh protocol").
//!
//! Wire shape is this crate's own concern (the opcode is otherwise opaque
//! to the router): request body is just the cache id; response is the
//! current topology version followed by a sequence of cache groups, each
//! carrying its `applicable` flag, key config, and inverted-on-arrival
//! partition map.

use bytes::{Buf, BufMut, BytesMut};

use crate::affinity::{CacheGroup, KeyConfig};
use crate::error::{ClientError, Result};
use crate::types::{AffinityTopologyVersion, NodeId};

/// Opcode for the partition-map request the router issues itself (spec.md §6).
pub const CACHE_PARTITIONS_OP_CODE: i16 = 2000;

pub fn encode_cache_partitions_request(buf: &mut Vec<u8>, cache_id: i32) {
    buf.extend_from_slice(&cache_id.to_le_bytes());
}

#[derive(Debug, Clone)]
pub struct CachePartitionsResponse {
    pub version: AffinityTopologyVersion,
    pub groups: Vec<CacheGroup>,
}

pub fn decode_cache_partitions_response(body: &[u8]) -> Result<CachePartitionsResponse> {
    let mut buf = body;
    let short = || ClientError::SerializationError("truncated CACHE_PARTITIONS response".to_string());

    if buf.len() < 12 {
        return Err(short());
    }
    let major = buf.get_i64_le();
    let minor = buf.get_i32_le();
    let version = AffinityTopologyVersion::new(major, minor);

    if buf.len() < 4 {
        return Err(short());
    }
    let group_count = buf.get_i32_le();
    let mut groups = Vec::with_capacity(group_count.max(0) as usize);

    for _ in 0..group_count {
        if buf.len() < 9 {
            return Err(short());
        }
        let cache_id = buf.get_i32_le();
        let applicable = buf.get_u8() != 0;

        let field_count = buf.get_i32_le();
        let mut affinity_fields = std::collections::HashMap::new();
        for _ in 0..field_count {
            if buf.len() < 8 {
                return Err(short());
            }
            let type_id = buf.get_i32_le();
            let field_id = buf.get_i32_le();
            affinity_fields.insert(type_id, field_id);
        }

        if buf.len() < 4 {
            return Err(short());
        }
        let node_count = buf.get_i32_le();
        let mut partition_map = Vec::with_capacity(node_count.max(0) as usize);
        for _ in 0..node_count {
            if buf.len() < 16 + 4 {
                return Err(short());
            }
            let mut id_bytes = [0u8; 16];
            buf.copy_to_slice(&mut id_bytes);
            let node_id = NodeId::from_bytes(id_bytes);
            let partition_count = buf.get_i32_le();
            if buf.len() < partition_count as usize * 4 {
                return Err(short());
            }
            let mut partitions = Vec::with_capacity(partition_count.max(0) as usize);
            for _ in 0..partition_count {
                partitions.push(buf.get_i32_le());
            }
            partition_map.push((node_id, partitions));
        }

        groups.push(CacheGroup {
            cache_id,
            applicable,
            key_config: KeyConfig { affinity_fields },
            partition_map,
        });
    }

    Ok(CachePartitionsResponse { version, groups })
}

#[allow(dead_code)]
pub fn encode_cache_partitions_response(response: &CachePartitionsResponse) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_i64_le(response.version.major);
    buf.put_i32_le(response.version.minor);
    buf.put_i32_le(response.groups.len() as i32);
    for group in &response.groups {
        buf.put_i32_le(group.cache_id);
        buf.put_u8(group.applicable as u8);
        buf.put_i32_le(group.key_config.affinity_fields.len() as i32);
        for (type_id, field_id) in &group.key_config.affinity_fields {
            buf.put_i32_le(*type_id);
            buf.put_i32_le(*field_id);
        }
        buf.put_i32_le(group.partition_map.len() as i32);
        for (node_id, partitions) in &group.partition_map {
            buf.put_slice(&node_id.as_bytes());
            buf.put_i32_le(partitions.len() as i32);
            for p in partitions {
                buf.put_i32_le(*p);
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 16])
    }

    #[test]
    fn round_trips_response_with_one_group() {
        let original = CachePartitionsResponse {
            version: AffinityTopologyVersion::new(4, 2),
            groups: vec![CacheGroup {
                cache_id: 7,
                applicable: true,
                key_config: KeyConfig::default(),
                partition_map: vec![(node(1), vec![0, 1, 2])],
            }],
        };
        let encoded = encode_cache_partitions_response(&original);
        let decoded = decode_cache_partitions_response(&encoded).unwrap();
        assert_eq!(decoded.version, original.version);
        assert_eq!(decoded.groups.len(), 1);
        assert_eq!(decoded.groups[0].cache_id, 7);
        assert!(decoded.groups[0].applicable);
        assert_eq!(decoded.groups[0].partition_map[0].1, vec![0, 1, 2]);
    }

    #[test]
    fn truncated_response_is_rejected() {
        let buf = [0u8; 4];
        assert!(decode_cache_partitions_response(&buf).is_err());
    }
}
