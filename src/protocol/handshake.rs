//! Handshake request/response (spec.md §6).
//!
//! `1,i16 ver_major | i16 ver_minor | i16 ver_patch | i8 client_code=2 |
//! bitmask_features | [user,password]`; response: `i8 success | … |
//! nodeId: UUID? | negotiated_feature_bitmask`.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ClientError, Result};
use crate::types::NodeId;

/// Protocol version this crate implements.
pub const PROTOCOL_VERSION: (i16, i16, i16) = (1, 0, 0);

/// Identifies this as a thin-client connection, distinct from a
/// server-to-server cluster connection.
const CLIENT_CODE: i8 = 2;

/// Feature bitmask bit requesting partition-awareness (spec.md §6).
pub const FEATURE_PARTITION_AWARENESS: u8 = 0x01;

/// The leading byte of a handshake request, per spec.md §6 (`1,i16 ...`).
const HANDSHAKE_OP_CODE: u8 = 1;

pub struct HandshakeRequest {
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub partition_awareness_requested: bool,
}

impl HandshakeRequest {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(HANDSHAKE_OP_CODE);
        buf.put_i16_le(PROTOCOL_VERSION.0);
        buf.put_i16_le(PROTOCOL_VERSION.1);
        buf.put_i16_le(PROTOCOL_VERSION.2);
        buf.put_i8(CLIENT_CODE);

        let mut features = 0u8;
        if self.partition_awareness_requested {
            features |= FEATURE_PARTITION_AWARENESS;
        }
        buf.put_u8(features);

        encode_optional_string(&mut buf, self.user_name.as_deref());
        encode_optional_string(&mut buf, self.password.as_deref());
        buf
    }
}

fn encode_optional_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(s) => {
            buf.put_u8(1);
            buf.put_i32_le(s.len() as i32);
            buf.put_slice(s.as_bytes());
        }
        None => buf.put_u8(0),
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub success: bool,
    pub node_id: Option<NodeId>,
    pub negotiated_version: (i16, i16, i16),
    pub negotiated_features: u8,
    pub error_message: Option<String>,
}

impl HandshakeResponse {
    pub fn partition_awareness_supported(&self) -> bool {
        self.negotiated_features & FEATURE_PARTITION_AWARENESS != 0
    }

    /// Decode a handshake response body (spec.md §6).
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let short = || ClientError::HandshakeFailed("truncated handshake response".to_string());

        if buf.is_empty() {
            return Err(short());
        }
        let success = buf.get_u8() != 0;

        if !success {
            if buf.len() < 6 {
                return Err(short());
            }
            let major = buf.get_i16_le();
            let minor = buf.get_i16_le();
            let patch = buf.get_i16_le();
            let message = decode_string(&mut buf).unwrap_or_default();
            return Ok(HandshakeResponse {
                success: false,
                node_id: None,
                negotiated_version: (major, minor, patch),
                negotiated_features: 0,
                error_message: Some(message),
            });
        }

        if buf.len() < 6 {
            return Err(short());
        }
        let major = buf.get_i16_le();
        let minor = buf.get_i16_le();
        let patch = buf.get_i16_le();

        if buf.is_empty() {
            return Err(short());
        }
        let has_node_id = buf.get_u8() != 0;
        let node_id = if has_node_id {
            if buf.len() < 16 {
                return Err(short());
            }
            let mut bytes = [0u8; 16];
            buf.copy_to_slice(&mut bytes);
            Some(NodeId::from_bytes(bytes))
        } else {
            None
        };

        if buf.is_empty() {
            return Err(short());
        }
        let negotiated_features = buf.get_u8();

        Ok(HandshakeResponse {
            success: true,
            node_id,
            negotiated_version: (major, minor, patch),
            negotiated_features,
            error_message: None,
        })
    }
}

fn decode_string(buf: &mut &[u8]) -> Option<String> {
    if buf.len() < 4 {
        return None;
    }
    let len = buf.get_i32_le() as usize;
    if buf.len() < len {
        return None;
    }
    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Some(s)
}
