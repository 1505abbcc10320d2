//! TLS integration tests

use super::{client_builder, eventually, generate_self_signed_cert, server_builder};
use netconduit::ConduitError;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Certificate and key written to a fresh temp directory
struct CertFiles {
    dir: PathBuf,
    cert: PathBuf,
    key: PathBuf,
}

impl CertFiles {
    fn generate() -> Self {
        let dir =
            std::env::temp_dir().join(format!("netconduit_test_tls_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let (cert_pem, key_pem) =
            generate_self_signed_cert(vec!["localhost".to_string(), "127.0.0.1".to_string()]);

        let cert = dir.join("server.crt");
        let key = dir.join("server.key");
        std::fs::File::create(&cert)
            .unwrap()
            .write_all(cert_pem.as_bytes())
            .unwrap();
        std::fs::File::create(&key)
            .unwrap()
            .write_all(key_pem.as_bytes())
            .unwrap();

        Self { dir, cert, key }
    }
}

impl Drop for CertFiles {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[tokio::test]
async fn test_tls_without_verification() {
    let certs = CertFiles::generate();
    let server = server_builder()
        .tls_files(&certs.cert, &certs.key)
        .rpc("echo", |_conn, params| async move { Ok(params) })
        .start()
        .await
        .expect("Failed to start TLS server");

    let client = client_builder(&server)
        .tls_insecure()
        .connect()
        .await
        .expect("Client failed to connect via TLS");

    let reply = client
        .rpc_call("echo", json!({ "message": "over tls" }))
        .await
        .unwrap();
    assert_eq!(reply["message"], "over tls");

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_tls_with_trusted_ca() {
    let certs = CertFiles::generate();
    let server = server_builder()
        .tls_files(&certs.cert, &certs.key)
        .start()
        .await
        .unwrap();

    // the self-signed certificate doubles as the trust anchor
    let client = client_builder(&server)
        .tls_ca(&certs.cert)
        .tls_server_name("localhost")
        .connect()
        .await
        .expect("Client failed to verify server certificate");
    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_plain_client_against_tls_server() {
    let certs = CertFiles::generate();
    let server = server_builder()
        .tls_files(&certs.cert, &certs.key)
        .start()
        .await
        .unwrap();

    let result = client_builder(&server)
        .handshake_timeout(Duration::from_millis(500))
        .connect()
        .await;
    assert!(result.is_err(), "plaintext client accepted by TLS server");
    assert_eq!(server.connection_count(), 0);
    server.stop().await;
}

#[test]
fn test_tls_requires_key_material() {
    let result = server_builder()
        .tls(netconduit::TlsConfig {
            enabled: true,
            ..Default::default()
        })
        .build();
    assert!(matches!(result, Err(ConduitError::Config(_))));
}
