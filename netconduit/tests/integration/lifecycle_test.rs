//! Heartbeats, reconnection, connection limits and shutdown

use super::{client_builder, eventually, server_builder, RawPeer, SECRET};
use netconduit::{ConduitError, DisconnectReason, ServerState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Reasons = Arc<Mutex<Vec<DisconnectReason>>>;

fn reasons() -> Reasons {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test]
async fn test_heartbeat_timeout_fires_once() {
    let timeouts = Arc::new(AtomicUsize::new(0));
    let closed = reasons();
    let server = server_builder()
        .heartbeat_interval(Duration::from_millis(100))
        .heartbeat_timeout(Duration::from_millis(300))
        .on_heartbeat_timeout({
            let timeouts = timeouts.clone();
            move |_conn| {
                let timeouts = timeouts.clone();
                async move {
                    timeouts.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .on_disconnect({
            let closed = closed.clone();
            move |_conn, reason| {
                let closed = closed.clone();
                async move {
                    closed.lock().unwrap().push(reason);
                }
            }
        })
        .start()
        .await
        .unwrap();

    // authenticates, then ignores every ping
    let mut peer = RawPeer::connect(server.local_addr().unwrap()).await;
    peer.authenticate(SECRET).await;
    assert!(peer.until_closed(Duration::from_secs(3)).await);

    assert!(eventually(Duration::from_secs(2), || !closed.lock().unwrap().is_empty()).await);
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(
        closed.lock().unwrap().as_slice(),
        &[DisconnectReason::HeartbeatTimeout]
    );
    server.stop().await;
}

#[tokio::test]
async fn test_responsive_client_stays_connected() {
    let server = server_builder()
        .heartbeat_interval(Duration::from_millis(100))
        .heartbeat_timeout(Duration::from_millis(300))
        .start()
        .await
        .unwrap();
    let client = client_builder(&server).connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(client.is_connected());
    assert_eq!(server.connection_count(), 1);

    let id = server.connections()[0].id;
    let conn = server.connection(&id).unwrap();
    assert!(conn.health().rtt.is_some());
    assert!(conn.health().last_heartbeat.is_some());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_after_server_side_close() {
    let server = server_builder().start().await.unwrap();

    let attempts = Arc::new(Mutex::new(Vec::<u32>::new()));
    let lost = reasons();
    let client = client_builder(&server)
        .reconnect(true)
        .reconnect_attempts(5)
        .reconnect_delay(Duration::from_millis(50), Duration::from_millis(200))
        .on_reconnect({
            let attempts = attempts.clone();
            move |attempt| {
                let attempts = attempts.clone();
                async move {
                    attempts.lock().unwrap().push(attempt);
                }
            }
        })
        .on_disconnect({
            let lost = lost.clone();
            move |reason| {
                let lost = lost.clone();
                async move {
                    lost.lock().unwrap().push(reason);
                }
            }
        })
        .connect()
        .await
        .unwrap();
    let first_session = client.session_token().unwrap();

    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);
    let id = server.connections()[0].id;
    server.disconnect(&id).unwrap();

    assert!(
        eventually(Duration::from_secs(3), || {
            attempts.lock().unwrap().len() == 1 && client.is_connected()
        })
        .await
    );
    assert_eq!(attempts.lock().unwrap().as_slice(), &[1]);
    assert!(lost.lock().unwrap()[0].is_unexpected());
    assert_ne!(client.session_token().unwrap(), first_session);
    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);

    // an explicit disconnect is final
    client.disconnect().await;
    assert_eq!(client.wait_for_disconnect().await, DisconnectReason::LocalClose);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!client.is_connected());
    assert_eq!(attempts.lock().unwrap().len(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_gives_up() {
    let server = server_builder().start().await.unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let client = client_builder(&server)
        .reconnect(true)
        .reconnect_attempts(2)
        .reconnect_delay(Duration::from_millis(50), Duration::from_millis(100))
        .on_error({
            let errors = errors.clone();
            move |_error| {
                let errors = errors.clone();
                async move {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .connect()
        .await
        .unwrap();

    // the listener goes away with the server, so every attempt is refused
    server.stop().await;

    let reason = tokio::time::timeout(Duration::from_secs(5), client.wait_for_disconnect())
        .await
        .expect("client kept retrying");
    assert_eq!(reason, DisconnectReason::ReconnectExhausted);
    assert_eq!(reason.as_str(), "reconnect_exhausted");
    assert_eq!(errors.load(Ordering::SeqCst), 2);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_server_stop_closes_connections() {
    let closed = reasons();
    let server = server_builder()
        .on_disconnect({
            let closed = closed.clone();
            move |_conn, reason| {
                let closed = closed.clone();
                async move {
                    closed.lock().unwrap().push(reason);
                }
            }
        })
        .start()
        .await
        .unwrap();
    let client = client_builder(&server).connect().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);

    server.stop().await;
    assert_eq!(server.state(), ServerState::Closed);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(
        closed.lock().unwrap().as_slice(),
        &[DisconnectReason::ServerShutdown]
    );

    let reason = tokio::time::timeout(Duration::from_secs(2), client.wait_for_disconnect())
        .await
        .unwrap();
    assert!(reason.is_unexpected(), "got {reason}");

    // a stopped server cannot be restarted
    assert!(matches!(
        server.start().await,
        Err(ConduitError::InvalidState(_))
    ));
    // stopping twice is harmless
    server.stop().await;
}

#[tokio::test]
async fn test_max_connections() {
    let server = server_builder().max_connections(1).start().await.unwrap();

    let first = client_builder(&server).connect().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);

    let rejected = client_builder(&server).connect().await;
    assert!(rejected.is_err(), "second connection accepted");
    assert!(!matches!(rejected, Err(ConduitError::Auth(_))));
    assert_eq!(server.connection_count(), 1);

    // the slot frees up once the first client leaves
    first.disconnect().await;
    let mut admitted = None;
    for _ in 0..20 {
        if let Ok(client) = client_builder(&server).connect().await {
            admitted = Some(client);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let second = admitted.expect("slot never released");
    second.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_server_introspection() {
    let server = server_builder().name("introspect").build().unwrap();
    assert_eq!(server.state(), ServerState::Created);
    assert_eq!(server.uptime(), Duration::ZERO);

    let addr = server.start().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));
    assert_eq!(server.state(), ServerState::Running);

    let client = client_builder(&server).name("probe").connect().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);

    let info = &server.connections()[0];
    assert_eq!(info.client_name.as_deref(), Some("probe"));
    assert_eq!(info.peer_addr.ip(), addr.ip());
    assert!(server.uptime() > Duration::ZERO);

    client.disconnect().await;
    server.stop().await;
    tokio::time::timeout(Duration::from_secs(1), server.wait_until_stopped())
        .await
        .unwrap();
}
