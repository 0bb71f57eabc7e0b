//! Wire protocol: framing (spec.md §4.1) and handshake (spec.md §6).

pub mod cache_partitions;
pub mod frame;
pub mod handshake;

pub use cache_partitions::{
    decode_cache_partitions_response, encode_cache_partitions_request, CachePartitionsResponse,
    CACHE_PARTITIONS_OP_CODE,
};
pub use frame::{decode_response_header, encode_request, ResponseHeader};
pub use handshake::{HandshakeRequest, HandshakeResponse};
