//! Wire frame encode/decode (spec.md §4.1, §6).
//!
//! Request: `i32 length | i16 opCode | i64 requestId | body`.
//! Response: `i32 length | i64 requestId | i32 status | (errorMessage | body)`.
//! All integers little-endian (spec.md §6). A single flag bit in the
//! response header signals "affinity topology changed", followed by the
//! new [`AffinityTopologyVersion`], ahead of the status field — only
//! present in partition-aware mode.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ClientError, Result};
use crate::types::AffinityTopologyVersion;

/// Bit set in the response header when the server piggybacks a topology
/// change onto this frame (spec.md §4.1).
const TOPOLOGY_CHANGED_FLAG: u8 = 0x01;

/// Write a request frame: `i32 length | i16 opCode | i64 requestId | body`.
pub fn encode_request(op_code: i16, request_id: i64, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + 2 + 8 + body.len());
    let length = (2 + 8 + body.len()) as i32;
    buf.put_i32_le(length);
    buf.put_i16_le(op_code);
    buf.put_i64_le(request_id);
    buf.put_slice(body);
    buf
}

/// Decoded response header plus the leftover body bytes (the status-0
/// payload, or the error message on a non-zero status).
#[derive(Debug)]
pub struct ResponseHeader {
    pub request_id: i64,
    pub status: i32,
    pub topology_change: Option<AffinityTopologyVersion>,
}

/// Parse a response frame's header (everything up to the body), given the
/// frame payload with the `i32 length` prefix already stripped, and
/// whether the session negotiated partition-awareness (which gates the
/// flag byte's presence).
pub fn decode_response_header(mut payload: &[u8], partition_aware: bool) -> Result<(ResponseHeader, &[u8])> {
    let short = || ClientError::SerializationError("truncated response frame".to_string());

    if payload.len() < 8 {
        return Err(short());
    }
    let request_id = payload.get_i64_le();

    let topology_change = if partition_aware {
        if payload.is_empty() {
            return Err(short());
        }
        let flags = payload.get_u8();
        if flags & TOPOLOGY_CHANGED_FLAG != 0 {
            if payload.len() < 12 {
                return Err(short());
            }
            let major = payload.get_i64_le();
            let minor = payload.get_i32_le();
            Some(AffinityTopologyVersion::new(major, minor))
        } else {
            None
        }
    } else {
        None
    };

    if payload.len() < 4 {
        return Err(short());
    }
    let status = payload.get_i32_le();

    Ok((
        ResponseHeader {
            request_id,
            status,
            topology_change,
        },
        payload,
    ))
}
