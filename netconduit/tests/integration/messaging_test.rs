//! Fire-and-forget messages, broadcast and rate limiting

use super::{client_builder, eventually, server_builder};
use netconduit::ConduitClient;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test]
async fn test_message_roundtrip() {
    let server = server_builder()
        .on("chat", |conn, data| async move {
            conn.send("chat_ack", json!({ "echo": data["text"] })).await?;
            Ok(())
        })
        .start()
        .await
        .unwrap();

    let acks = Arc::new(Mutex::new(Vec::<Value>::new()));
    let client = client_builder(&server)
        .on("chat_ack", {
            let acks = acks.clone();
            move |_conn, data| {
                let acks = acks.clone();
                async move {
                    acks.lock().unwrap().push(data);
                    Ok(())
                }
            }
        })
        .connect()
        .await
        .unwrap();

    client.send("chat", json!({ "text": "hi" })).await.unwrap();
    assert!(eventually(Duration::from_secs(2), || acks.lock().unwrap().len() == 1).await);
    assert_eq!(acks.lock().unwrap()[0], json!({ "echo": "hi" }));

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_messages_keep_order() {
    let seen = Arc::new(Mutex::new(Vec::<u64>::new()));
    let server = server_builder()
        .no_rate_limit()
        .on("seq", {
            let seen = seen.clone();
            move |_conn, data| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(data.as_u64().unwrap_or_default());
                    Ok(())
                }
            }
        })
        .start()
        .await
        .unwrap();
    let client = client_builder(&server).connect().await.unwrap();

    for i in 0..200u64 {
        client.send("seq", json!(i)).await.unwrap();
    }
    assert!(eventually(Duration::from_secs(5), || seen.lock().unwrap().len() == 200).await);
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, (0..200).collect::<Vec<_>>());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unhandled_kind_reaches_fallback() {
    let fallback = counter();
    let server = server_builder()
        .on_unhandled({
            let fallback = fallback.clone();
            move |_conn, message| {
                let fallback = fallback.clone();
                async move {
                    assert_eq!(message.kind, "mystery");
                    fallback.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .start()
        .await
        .unwrap();
    let client = client_builder(&server).connect().await.unwrap();

    client.send("mystery", Value::Null).await.unwrap();
    assert!(eventually(Duration::from_secs(2), || fallback.load(Ordering::SeqCst) == 1).await);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_rate_limit_drops_excess() {
    let received = counter();
    let server = server_builder()
        .rate_limit(5)
        .on("tick", {
            let received = received.clone();
            move |_conn, _data| {
                let received = received.clone();
                async move {
                    received.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
        .start()
        .await
        .unwrap();
    let client = client_builder(&server).connect().await.unwrap();

    for i in 0..20 {
        client.send("tick", json!(i)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let delivered = received.load(Ordering::SeqCst);
    assert!(delivered >= 1, "nothing delivered");
    assert!(delivered < 20, "rate limit not applied: {delivered}");

    // dropping is silent, the connection stays up
    assert!(client.is_connected());
    client.disconnect().await;
    server.stop().await;
}

async fn news_client(
    server: &netconduit::ConduitServer,
    name: &str,
    hits: Arc<AtomicUsize>,
) -> ConduitClient {
    client_builder(server)
        .name(name)
        .on("news", move |_conn, _data| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .connect()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_broadcast_with_exclude() {
    let server = server_builder().start().await.unwrap();

    let hits = [counter(), counter(), counter()];
    let a = news_client(&server, "a", hits[0].clone()).await;
    let b = news_client(&server, "b", hits[1].clone()).await;
    let c = news_client(&server, "c", hits[2].clone()).await;
    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 3).await);

    let excluded = server
        .connections()
        .into_iter()
        .find(|info| info.client_name.as_deref() == Some("c"))
        .unwrap()
        .id;

    let delivered = server
        .broadcast("news", json!({ "headline": "hello" }), &[excluded])
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    assert!(
        eventually(Duration::from_secs(2), || {
            hits[0].load(Ordering::SeqCst) == 1 && hits[1].load(Ordering::SeqCst) == 1
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits[2].load(Ordering::SeqCst), 0);

    for client in [a, b, c] {
        client.disconnect().await;
    }
    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_without_connections() {
    let server = server_builder().start().await.unwrap();
    let delivered = server.broadcast("news", Value::Null, &[]).await.unwrap();
    assert_eq!(delivered, 0);
    server.stop().await;
}

#[tokio::test]
async fn test_byte_counters() {
    let server = server_builder().start().await.unwrap();
    let client = client_builder(&server).connect().await.unwrap();
    client.send("noise", json!({ "pad": "x".repeat(512) })).await.unwrap();

    assert!(eventually(Duration::from_secs(2), || server.total_bytes_received() > 512).await);
    assert!(server.total_bytes_sent() > 0);

    assert!(
        eventually(Duration::from_secs(2), || {
            client.health().is_some_and(|health| health.bytes_sent > 512)
        })
        .await
    );

    client.disconnect().await;
    // totals survive the connection
    assert!(
        eventually(Duration::from_secs(2), || {
            server.connection_count() == 0 && server.total_bytes_received() > 512
        })
        .await
    );
    server.stop().await;
}
