//! RPC round trips in both directions

use super::{client_builder, eventually, server_builder};
use netconduit::RpcError;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Outcome = Arc<Mutex<Option<Result<Value, RpcError>>>>;

#[tokio::test]
async fn test_echo_rpc() {
    let server = server_builder()
        .rpc("echo", |_conn, params| async move { Ok(params) })
        .start()
        .await
        .expect("Failed to start server");

    let client = client_builder(&server)
        .connect()
        .await
        .expect("Failed to connect");
    assert!(client.is_connected());
    assert!(client.session_token().is_some());

    let reply = client
        .rpc_call("echo", json!({ "message": "Hello NetConduit" }))
        .await
        .expect("echo failed");
    assert_eq!(reply, json!({ "message": "Hello NetConduit" }));

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let server = server_builder()
        .rpc("double", |_conn, params| async move {
            let n = params["n"].as_u64().unwrap_or_default();
            // later requests finish first
            tokio::time::sleep(Duration::from_millis(100 - n * 10)).await;
            Ok(json!(n * 2))
        })
        .start()
        .await
        .unwrap();
    let client = client_builder(&server).connect().await.unwrap();

    let calls: Vec<_> = (0..8u64)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move { (n, client.rpc_call("double", json!({ "n": n })).await) })
        })
        .collect();
    for call in calls {
        let (n, reply) = call.await.unwrap();
        assert_eq!(reply.unwrap(), json!(n * 2));
    }

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_method() {
    let server = server_builder().start().await.unwrap();
    let client = client_builder(&server).connect().await.unwrap();

    let err = client
        .rpc_call("does_not_exist", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound(_)), "got {err:?}");

    // the connection survives a failed call
    assert!(client.is_connected());
    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_handler_error_is_reported() {
    let server = server_builder()
        .rpc("fail", |_conn, _params| async move {
            Err(anyhow::anyhow!("database unavailable"))
        })
        .start()
        .await
        .unwrap();
    let client = client_builder(&server).connect().await.unwrap();

    match client.rpc_call("fail", Value::Null).await {
        Err(RpcError::Remote { message, .. }) => assert!(message.contains("database unavailable")),
        other => panic!("expected remote error, got {other:?}"),
    }

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_rpc_timeout() {
    let server = server_builder()
        .rpc("slow", |_conn, _params| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Value::Null)
        })
        .start()
        .await
        .unwrap();
    let client = client_builder(&server)
        .rpc_timeout(Duration::from_millis(200))
        .connect()
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = client.rpc_call("slow", Value::Null).await.unwrap_err();
    assert_eq!(err, RpcError::Timeout);
    assert!(started.elapsed() < Duration::from_secs(2));

    let conn = client.connection().unwrap();
    assert!(conn.is_active());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_server_calls_client() {
    let server = server_builder().start().await.unwrap();
    let client = client_builder(&server)
        .name("worker")
        .rpc("whoami", |_conn, _params| async move { Ok(json!("worker")) })
        .connect()
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);
    let info = server.connections();
    assert_eq!(info[0].client_name.as_deref(), Some("worker"));

    let reply = server
        .rpc_call(&info[0].id, "whoami", Value::Null)
        .await
        .unwrap();
    assert_eq!(reply, json!("worker"));

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_rpc_from_connect_hooks() {
    let asked: Outcome = Arc::default();
    let server = server_builder()
        .rpc("echo", |_conn, params| async move { Ok(params) })
        .on_connect({
            let asked = asked.clone();
            move |conn| {
                let asked = asked.clone();
                async move {
                    let reply = conn.rpc_call("whoami", Value::Null).await;
                    *asked.lock().unwrap() = Some(reply);
                }
            }
        })
        .start()
        .await
        .unwrap();

    let greeted: Outcome = Arc::default();
    let client = client_builder(&server)
        .rpc("whoami", |_conn, _params| async move { Ok(json!("worker")) })
        .on_connect({
            let greeted = greeted.clone();
            move |conn| {
                let greeted = greeted.clone();
                async move {
                    let reply = conn.rpc_call("echo", json!("hi")).await;
                    *greeted.lock().unwrap() = Some(reply);
                }
            }
        })
        .connect()
        .await
        .unwrap();

    // both hooks wait on a reply that only the running read loop can deliver
    assert!(
        eventually(Duration::from_secs(3), || {
            asked.lock().unwrap().is_some() && greeted.lock().unwrap().is_some()
        })
        .await
    );
    assert_eq!(asked.lock().unwrap().clone(), Some(Ok(json!("worker"))));
    assert_eq!(greeted.lock().unwrap().clone(), Some(Ok(json!("hi"))));

    client.disconnect().await;
    server.stop().await;
}
