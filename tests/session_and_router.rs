//! Loopback integration tests: a hand-rolled fake server implementing just
//! enough of the wire protocol (§4.1, §6) to drive handshake, request
//! dispatch, and failover end-to-end without a real cluster — the same
//! `tokio::test` + `TcpListener` fixture style the teacher's networking
//! tests use.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use partition_client::config::ClientConfig;
use partition_client::error::ClientError;
use partition_client::router::{Router, RouterState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

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

fn successful_handshake_response() -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(1); // success
    buf.put_i16_le(1);
    buf.put_i16_le(0);
    buf.put_i16_le(0);
    buf.put_u8(0); // no node id (legacy session is enough for these tests)
    buf.put_u8(0); // no features negotiated
    buf
}

/// Accept one connection, complete a successful handshake, then echo a
/// single request back with status 0 and an empty body.
async fn serve_one_request(listener: TcpListener) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let _handshake_req = read_frame(&mut stream).await;
    write_frame(&mut stream, &successful_handshake_response()).await;

    let request = read_frame(&mut stream).await;
    // request: i16 opCode | i64 requestId | body
    let request_id = i64::from_le_bytes(request[2..10].try_into().unwrap());

    let mut response = BytesMut::new();
    response.put_i64_le(request_id);
    response.put_i32_le(0); // status
    write_frame(&mut stream, &response).await;

    // keep the connection open briefly so the client doesn't see an EOF
    // race before it reads the response
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Accept one connection, handshake successfully, then immediately close
/// without answering any request (simulates a node dying mid-request).
async fn serve_handshake_then_die(listener: TcpListener) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let _handshake_req = read_frame(&mut stream).await;
    write_frame(&mut stream, &successful_handshake_response()).await;
    let _request = read_frame(&mut stream).await;
    drop(stream);
}

#[tokio::test]
async fn connect_and_send_round_trips_through_a_fake_server() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_one_request(listener));

    let config = ClientConfig::new(vec![addr.to_string()]);
    let router = Router::new(config).unwrap();
    router.connect().await.unwrap();
    assert_eq!(router.state(), RouterState::Connected);

    let result: Result<(), ClientError> = router
        .send(42, None, |_buf: &mut Vec<u8>| {}, |_body: &[u8]| Ok(()))
        .await;
    assert!(result.is_ok());

    server.await.unwrap();
}

#[tokio::test]
async fn connect_fails_when_no_endpoint_is_reachable() {
    // Port 1 is privileged and never accepts loopback connections in test sandboxes.
    let config = ClientConfig::new(vec!["127.0.0.1:1".to_string()]).with_connect_timeout(Duration::from_millis(200));
    let router = Router::new(config).unwrap();
    let result = router.connect().await;
    assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
    assert_eq!(router.state(), RouterState::Disconnected);
}

#[tokio::test]
async fn send_fails_with_illegal_state_before_connect() {
    let config = ClientConfig::new(vec!["127.0.0.1:65535".to_string()]);
    let router = Router::new(config).unwrap();
    let result: Result<(), ClientError> = router
        .send(1, None, |_buf: &mut Vec<u8>| {}, |_body: &[u8]| Ok(()))
        .await;
    assert!(matches!(result, Err(ClientError::IllegalState(RouterState::Disconnected))));
}

#[tokio::test]
async fn lost_connection_mid_request_surfaces_as_lost_connection_when_no_sessions_remain() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_handshake_then_die(listener));

    let config = ClientConfig::new(vec![addr.to_string()]);
    let router = Router::new(config).unwrap();
    router.connect().await.unwrap();

    let result: Result<(), ClientError> = router
        .send(7, None, |_buf: &mut Vec<u8>| {}, |_body: &[u8]| Ok(()))
        .await;
    assert!(matches!(result, Err(ClientError::LostConnection(_))));

    server.await.unwrap();
}
