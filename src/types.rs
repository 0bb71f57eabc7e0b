//! Shared identifiers and value types for the router/dispatch core.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `host:port` endpoint string, as supplied in [`crate::config::ClientConfig::endpoints`].
pub type Endpoint = String;

/// 16-byte UUID reported by a server during handshake.
///
/// Absent on legacy servers; a session without a `NodeId` is the legacy
/// session (§3 of the spec — at most one may exist in the pool at a time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NodeId(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(major, minor)` pair, lexicographically ordered, monotonically
/// non-decreasing across the cluster's lifetime (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AffinityTopologyVersion {
    pub major: i64,
    pub minor: i32,
}

impl AffinityTopologyVersion {
    pub const ZERO: AffinityTopologyVersion = AffinityTopologyVersion { major: 0, minor: 0 };

    pub fn new(major: i64, minor: i32) -> Self {
        Self { major, minor }
    }
}

impl PartialOrd for AffinityTopologyVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AffinityTopologyVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major.cmp(&other.major).then(self.minor.cmp(&other.minor))
    }
}

/// Server-side type codes used for key/affinity-key type inference (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    Char,
    Boolean,
    String,
    Uuid,
    BinaryObject,
    ComplexObject,
}

impl TypeCode {
    /// The server-assigned wire code for this type.
    ///
    /// Values are placeholders for the external binary-object codec; the
    /// core only needs them to be stable and distinct.
    pub fn wire_code(self) -> i8 {
        match self {
            TypeCode::Byte => 1,
            TypeCode::Short => 2,
            TypeCode::Integer => 3,
            TypeCode::Long => 4,
            TypeCode::Float => 5,
            TypeCode::Double => 6,
            TypeCode::Char => 7,
            TypeCode::Boolean => 8,
            TypeCode::String => 9,
            TypeCode::Uuid => 10,
            TypeCode::BinaryObject => 27,
            TypeCode::ComplexObject => 103,
        }
    }
}
