//! Embeddable server with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use netconduit::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> netconduit::Result<()> {
//! let server = ServerBuilder::new()
//!     .host("0.0.0.0")
//!     .port(8080)
//!     .secret("my-secret")
//!     .rpc("echo", |_conn, params| async move { Ok(params) })
//!     .on("chat", |conn, data| async move {
//!         conn.send("chat_ack", json!({ "seen": data })).await?;
//!         Ok(())
//!     })
//!     .start()
//!     .await?;
//!
//! server.wait_until_stopped().await;
//! # Ok(())
//! # }
//! ```

use netconduit_common::{Result, Secret, ServerConfig, TlsConfig};
use netconduit_core::dispatch::ErrorEvent;
use netconduit_core::{
    ConduitServer, ConnectionHandle, DisconnectReason, Handlers, Hook, ServerHooks,
};
use netconduit_protocol::AppMessage;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Builder for constructing a [`ConduitServer`] with ergonomic configuration.
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    handlers: Handlers,
    hooks: ServerHooks,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete configuration, e.g. one loaded from a file
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Name reported to clients on successful authentication
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Default: `0.0.0.0`
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Port 0 binds an ephemeral port; read it back from `start()`.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set host and port from a socket address
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.host = addr.ip().to_string();
        self.config.port = addr.port();
        self
    }

    /// Shared secret clients must present. Required.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<Secret>) -> Self {
        self.config.secret = secret.into();
        self
    }

    #[must_use]
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.config.tls = config;
        self
    }

    /// Enable TLS with a PEM certificate chain and private key
    #[must_use]
    pub fn tls_files(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.config.tls.enabled = true;
        self.config.tls.cert_file = Some(cert_file.into());
        self.config.tls.key_file = Some(key_file.into());
        self
    }

    /// Default: 100
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.limits.max_connections = max;
        self
    }

    /// Default: 10 MiB
    #[must_use]
    pub fn max_message_size(mut self, max: usize) -> Self {
        self.config.limits.max_message_size = max;
        self
    }

    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.limits.buffer_size = size;
        self
    }

    /// Time allowed for the TLS upgrade of an accepted socket
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.connection_timeout = timeout;
        self
    }

    /// Time a client has to send AUTH_REQUEST
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.send_timeout = timeout;
        self
    }

    /// Default deadline for server-initiated RPC calls
    #[must_use]
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.rpc_timeout = timeout;
        self
    }

    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat.interval = interval;
        self
    }

    /// Must exceed the heartbeat interval
    #[must_use]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat.timeout = timeout;
        self
    }

    #[must_use]
    pub fn send_queue_size(mut self, size: usize) -> Self {
        self.config.queues.send_queue_size = size;
        self
    }

    #[must_use]
    pub fn receive_queue_size(mut self, size: usize) -> Self {
        self.config.queues.receive_queue_size = size;
        self
    }

    /// Inbound MESSAGE and RPC_REQUEST frames per second per connection
    #[must_use]
    pub fn rate_limit(mut self, messages_per_second: u32) -> Self {
        self.config.rate_limit.enabled = true;
        self.config.rate_limit.messages_per_second = messages_per_second;
        self
    }

    #[must_use]
    pub fn no_rate_limit(mut self) -> Self {
        self.config.rate_limit.enabled = false;
        self
    }

    /// Handle MESSAGE frames of one application kind
    #[must_use]
    pub fn on<F, Fut>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.on(kind, handler);
        self
    }

    /// Fallback for message kinds without a handler
    #[must_use]
    pub fn on_unhandled<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, AppMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .on_unhandled(move |(conn, message): (ConnectionHandle, AppMessage)| {
                handler(conn, message)
            });
        self
    }

    /// Expose an RPC method to clients
    #[must_use]
    pub fn rpc<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.handlers.rpc(method, handler);
        self
    }

    /// Called once a client has authenticated
    #[must_use]
    pub fn on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_connect = Some(Hook::new(hook));
        self
    }

    /// Called after an authenticated connection has torn down
    #[must_use]
    pub fn on_disconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionHandle, DisconnectReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_disconnect = Some(Hook::new(
            move |(conn, reason): (ConnectionHandle, DisconnectReason)| hook(conn, reason),
        ));
        self
    }

    #[must_use]
    pub fn on_heartbeat_timeout<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.on_heartbeat_timeout(Hook::new(hook));
        self
    }

    /// Handler failures and rejected peers. The handle is `None` when the
    /// error happened before a connection existed.
    #[must_use]
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Option<ConnectionHandle>, netconduit_common::ConduitError) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .on_error(Hook::new(move |(conn, error): ErrorEvent| hook(conn, error)));
        self
    }

    /// Validate the configuration and build the server without binding.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Config` if the configuration is inconsistent,
    /// e.g. no secret or TLS enabled without certificate files.
    pub fn build(self) -> Result<ConduitServer> {
        ConduitServer::new(self.config, self.handlers, self.hooks)
    }

    /// Build and start listening
    pub async fn start(self) -> Result<ConduitServer> {
        let server = self.build()?;
        server.start().await?;
        Ok(server)
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
