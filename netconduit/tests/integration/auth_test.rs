//! Handshake and authentication failures

use super::{client_builder, eventually, server_builder, RawPeer, SECRET};
use netconduit::protocol::{AuthFailure, Frame, MessageType};
use netconduit::ConduitError;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_wrong_secret_rejected() {
    let connects = Arc::new(AtomicUsize::new(0));
    let server = server_builder()
        .on_connect({
            let connects = connects.clone();
            move |_conn| {
                let connects = connects.clone();
                async move {
                    connects.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .start()
        .await
        .unwrap();

    let result = client_builder(&server)
        .secret("not-the-secret")
        .connect()
        .await;
    assert!(
        matches!(result, Err(ConduitError::Auth(_))),
        "expected auth failure, got {result:?}"
    );

    // rejected peers never reach the registry or the connect hook
    assert_eq!(server.connection_count(), 0);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_correct_secret_reports_session() {
    let server = server_builder().name("auth-test").start().await.unwrap();
    let mut peer = RawPeer::connect(server.local_addr().unwrap()).await;

    let success = peer.authenticate(SECRET).await;
    assert_eq!(success.server_name, "auth-test");
    assert!(!success.session_token.is_empty());
    assert_eq!(
        success.heartbeat_interval_ms,
        server.config().heartbeat.interval.as_millis() as u64
    );

    let id = success.connection_id;
    assert!(eventually(Duration::from_secs(2), || server.connection(&id).is_some()).await);
    server.stop().await;
}

#[tokio::test]
async fn test_message_before_auth_closes_connection() {
    let server = server_builder().start().await.unwrap();
    let mut peer = RawPeer::connect(server.local_addr().unwrap()).await;

    peer.send(&Frame::message("chat", json!({ "text": "too early" })).unwrap())
        .await;

    let reply = peer.recv().await.expect("expected AUTH_FAILURE");
    assert_eq!(reply.message_type, MessageType::AuthFailure);
    let failure: AuthFailure = reply.body().unwrap();
    assert!(!failure.reason.is_empty());

    assert!(peer.until_closed(Duration::from_secs(2)).await);
    assert_eq!(server.connection_count(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_silent_peer_hits_handshake_timeout() {
    let server = server_builder()
        .handshake_timeout(Duration::from_millis(200))
        .start()
        .await
        .unwrap();
    let mut peer = RawPeer::connect(server.local_addr().unwrap()).await;

    // never sends AUTH_REQUEST
    assert!(peer.until_closed(Duration::from_secs(2)).await);
    server.stop().await;
}

#[tokio::test]
async fn test_garbage_closes_connection() {
    use tokio::io::AsyncWriteExt;

    let server = server_builder().start().await.unwrap();
    let mut stream = tokio::net::TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: example\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 256];
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        use tokio::io::AsyncReadExt;
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server kept a non-protocol peer open");
    server.stop().await;
}
