#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for NetConduit
//!
//! These tests run real servers and clients over loopback.

mod auth_test;
mod lifecycle_test;
mod messaging_test;
mod rpc_test;
mod tls_test;

use netconduit::protocol::{
    AuthRequest, AuthSuccess, ConduitCodec, Frame, FrameBuffer, MessageType,
};
use netconduit::{ClientBuilder, ConduitServer, ServerBuilder};
use netconduit_core::auth::hash_secret;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

pub const SECRET: &str = "echo_secret";

/// Honour RUST_LOG when debugging a failing test
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Server on an ephemeral loopback port with the test secret
pub fn server_builder() -> ServerBuilder {
    init_logging();
    ServerBuilder::new()
        .host("127.0.0.1")
        .port(0)
        .secret(SECRET)
}

/// Client for `server` with reconnection off unless a test turns it on
pub fn client_builder(server: &ConduitServer) -> ClientBuilder {
    let addr = server.local_addr().expect("server not started");
    ClientBuilder::new()
        .server("127.0.0.1", addr.port())
        .secret(SECRET)
        .reconnect(false)
        .connection_timeout(Duration::from_secs(2))
        .handshake_timeout(Duration::from_secs(2))
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Speaks the wire protocol by hand, for peers that misbehave
pub struct RawPeer {
    stream: TcpStream,
    codec: ConduitCodec,
    buffer: FrameBuffer,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let codec = ConduitCodec::new();
        Self {
            stream,
            codec,
            buffer: FrameBuffer::new(codec),
        }
    }

    pub async fn send(&mut self, frame: &Frame) {
        let bytes = self.codec.encode_frame(frame).expect("encode failed");
        self.stream.write_all(&bytes).await.expect("write failed");
    }

    /// Next frame, or `None` once the server has closed the stream
    pub async fn recv(&mut self) -> Option<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.buffer.decode_one() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(_) => return None,
            }
            let n = self.stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            self.buffer.feed(&chunk[..n]);
        }
    }

    /// Read until the server closes, skipping whatever it still sends
    pub async fn until_closed(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async { while self.recv().await.is_some() {} })
            .await
            .is_ok()
    }

    pub async fn authenticate(&mut self, secret: &str) -> AuthSuccess {
        let request = AuthRequest {
            secret_hash: hash_secret(secret),
            client_name: "raw-peer".into(),
            client_version: "0".into(),
            metadata: Default::default(),
        };
        self.send(&Frame::auth_request(&request).unwrap()).await;

        let reply = self.recv().await.expect("no handshake reply");
        assert_eq!(reply.message_type, MessageType::AuthSuccess);
        reply.body().unwrap()
    }
}

/// Generate a self-signed certificate for testing
pub fn generate_self_signed_cert(subject_alt_names: Vec<String>) -> (String, String) {
    let mut params =
        rcgen::CertificateParams::new(subject_alt_names).expect("Failed to create params");
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "localhost");

    let key_pair = rcgen::KeyPair::generate().expect("Failed to generate key pair");
    let cert = params
        .self_signed(&key_pair)
        .expect("Failed to generate cert");
    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    (cert_pem, key_pem)
}
