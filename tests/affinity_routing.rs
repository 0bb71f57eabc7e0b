//! Loopback test for partition-aware dispatch: two fake nodes, each with a
//! distinct NodeId, a `CACHE_PARTITIONS` response splitting one partition
//! per node, and an affinity-hinted `send` that must land on the node the
//! partition map names (spec.md §4.3 "Selecting a node").

use std::collections::HashMap;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use partition_client::affinity::{BinaryObjectKey, CacheGroup, KeyConfig, KeyInput};
use partition_client::codec::KeyValue;
use partition_client::config::ClientConfig;
use partition_client::protocol::cache_partitions::{encode_cache_partitions_response, CachePartitionsResponse};
use partition_client::protocol::CACHE_PARTITIONS_OP_CODE;
use partition_client::router::{AffinityHint, Router};
use partition_client::types::{AffinityTopologyVersion, NodeId, TypeCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const PUT_OP_CODE: i16 = 1;

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = i32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    body
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    stream.write_i32_le(body.len() as i32).await.unwrap();
    stream.write_all(body).await.unwrap();
    stream.flush().await.unwrap();
}

fn handshake_response_with_node_id(node_id: NodeId) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(1); // success
    buf.put_i16_le(1);
    buf.put_i16_le(0);
    buf.put_i16_le(0);
    buf.put_u8(1); // has node id
    buf.put_slice(&node_id.as_bytes());
    buf.put_u8(0x01); // partition-awareness negotiated
    buf
}

/// Wraps a response body the way every frame needs once partition-awareness
/// is negotiated: `requestId | flags=0 (no topology change) | status=0 | body`.
fn response_frame(request_id: i64, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_i64_le(request_id);
    buf.put_u8(0); // no topology-changed flag
    buf.put_i32_le(0); // status ok
    buf.put_slice(body);
    buf
}

/// One fake node: handshakes with a NodeId and partition-awareness
/// enabled. If `cache_partitions` is set, answers a `CACHE_PARTITIONS`
/// request with it; always answers the next PUT with an empty ok body and
/// signals `hit`.
async fn serve_node(
    listener: TcpListener,
    node_id: NodeId,
    cache_partitions: Option<CachePartitionsResponse>,
    hit: std::sync::Arc<Notify>,
) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let _handshake_req = read_frame(&mut stream).await;
    write_frame(&mut stream, &handshake_response_with_node_id(node_id)).await;

    loop {
        let request = read_frame(&mut stream).await;
        let op_code = i16::from_le_bytes(request[0..2].try_into().unwrap());
        let request_id = i64::from_le_bytes(request[2..10].try_into().unwrap());

        if op_code == CACHE_PARTITIONS_OP_CODE {
            let response = cache_partitions
                .as_ref()
                .map(encode_cache_partitions_response)
                .unwrap_or_default();
            write_frame(&mut stream, &response_frame(request_id, &response)).await;
            continue;
        }

        if op_code == PUT_OP_CODE {
            write_frame(&mut stream, &response_frame(request_id, &[])).await;
            hit.notify_one();
            return;
        }
    }
}

#[tokio::test]
async fn affinity_hinted_send_lands_on_the_mapped_node() {
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap();
    let addr_b = listener_b.local_addr().unwrap();

    let node_a = NodeId::from_bytes([1u8; 16]);
    let node_b = NodeId::from_bytes([2u8; 16]);

    let mut fields = HashMap::new();
    fields.insert(5, (KeyValue::Integer(16161616), TypeCode::Integer));
    let key = BinaryObjectKey { type_id: 77, fields };
    let key_hash = 16161616i32;
    let target = partition_client::affinity::rendezvous::partition_for(key_hash, 2);
    let target_node = if target == 0 { node_a } else { node_b };

    let cache_partitions = CachePartitionsResponse {
        version: AffinityTopologyVersion::new(1, 0),
        groups: vec![CacheGroup {
            cache_id: 99,
            applicable: true,
            key_config: KeyConfig::default(),
            partition_map: vec![(node_a, vec![0]), (node_b, vec![1])],
        }],
    };

    let hit_target = std::sync::Arc::new(Notify::new());
    let hit_other = std::sync::Arc::new(Notify::new());
    let (hit_a, hit_b) = if target_node == node_a {
        (hit_target.clone(), hit_other.clone())
    } else {
        (hit_other.clone(), hit_target.clone())
    };

    // Either server can answer the recursive CACHE_PARTITIONS lookup — the
    // router's choice of which one to ask is unrelated to which one the
    // affinity hint should ultimately route the PUT to.
    let server_a = tokio::spawn(serve_node(listener_a, node_a, Some(cache_partitions.clone()), hit_a));
    let server_b = tokio::spawn(serve_node(listener_b, node_b, Some(cache_partitions), hit_b));

    let config = ClientConfig::new(vec![addr_a.to_string(), addr_b.to_string()]).with_partition_awareness(true);
    let router = Router::new(config).unwrap();
    router.connect().await.unwrap();

    // let the background connector pick up the second endpoint so
    // partition-awareness goes active (requires >= 2 live sessions).
    tokio::time::sleep(Duration::from_millis(100)).await;

    let hint = AffinityHint {
        cache_id: 99,
        key: KeyInput::BinaryObject(key),
    };

    let result: Result<(), partition_client::error::ClientError> = router
        .send(PUT_OP_CODE, Some(hint), |_buf: &mut Vec<u8>| {}, |_body: &[u8]| Ok(()))
        .await;
    assert!(result.is_ok(), "{result:?}");

    let hit_by_target = tokio::time::timeout(Duration::from_millis(500), hit_target.notified()).await.is_ok();
    assert!(hit_by_target, "request did not land on the node named by the partition map");

    server_a.abort();
    server_b.abort();
}
