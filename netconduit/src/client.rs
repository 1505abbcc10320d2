//! Embeddable client with builder pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use netconduit::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> netconduit::Result<()> {
//! let client = ClientBuilder::new()
//!     .server("127.0.0.1", 8080)
//!     .secret("my-secret")
//!     .on("chat_ack", |_conn, data| async move {
//!         println!("ack: {data}");
//!         Ok(())
//!     })
//!     .connect()
//!     .await?;
//!
//! let reply = client.rpc_call("echo", json!({ "message": "hi" })).await?;
//! println!("{reply}");
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use netconduit_common::{ClientConfig, ConduitError, Result, Secret, TlsConfig};
use netconduit_core::{
    ClientHooks, ConduitClient, ConnectionHandle, DisconnectReason, Handlers, Hook,
};
use netconduit_protocol::AppMessage;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

/// Builder for constructing a [`ConduitClient`] with ergonomic configuration.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    handlers: Handlers,
    hooks: ClientHooks,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Name reported to the server in AUTH_REQUEST
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

    /// Server to dial
    #[must_use]
    pub fn server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.host = host.into();
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

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

    /// Enable TLS and trust the given CA certificate
    #[must_use]
    pub fn tls_ca(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.config.tls.enabled = true;
        self.config.tls.verify_peer = true;
        self.config.tls.ca_file = Some(ca_file.into());
        self
    }

    /// Enable TLS without certificate verification.
    ///
    /// Only for self-signed test deployments.
    #[must_use]
    pub fn tls_insecure(mut self) -> Self {
        self.config.tls.enabled = true;
        self.config.tls.verify_peer = false;
        self
    }

    /// Override the name used for SNI and certificate checks
    #[must_use]
    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.tls.server_name = Some(name.into());
        self
    }

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

    /// TCP connect plus TLS upgrade
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.connection_timeout = timeout;
        self
    }

    /// Wait for AUTH_SUCCESS
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

    /// Limit frames accepted from the server
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

    /// Reconnect after an unexpected loss. Default: on.
    #[must_use]
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect.enabled = enabled;
        self
    }

    /// Attempts per outage before giving up
    #[must_use]
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.attempts = attempts;
        self
    }

    /// First delay and the cap for later ones
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration, max_delay: Duration) -> Self {
        self.config.reconnect.delay = delay;
        self.config.reconnect.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn reconnect_factor(mut self, factor: f64) -> Self {
        self.config.reconnect.factor = factor;
        self
    }

    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.config.reconnect.jitter = jitter;
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

    /// Expose an RPC method to the server
    #[must_use]
    pub fn rpc<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.handlers.rpc(method, handler);
        self
    }

    /// Called after every successful handshake, reconnects included
    #[must_use]
    pub fn on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_connect = Some(Hook::new(hook));
        self
    }

    #[must_use]
    pub fn on_disconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(DisconnectReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_disconnect = Some(Hook::new(hook));
        self
    }

    /// Receives the 1-based attempt number that succeeded
    #[must_use]
    pub fn on_reconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_reconnect = Some(Hook::new(hook));
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

    /// Failed reconnect attempts and handler failures
    #[must_use]
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConduitError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook = Hook::new(hook);
        let forward = hook.clone();
        self.handlers.on_error(Hook::new(
            move |(_conn, error): (Option<ConnectionHandle>, ConduitError)| {
                let forward = forward.clone();
                async move { forward.call(error).await }
            },
        ));
        self.hooks.on_error = Some(hook);
        self
    }

    /// Validate the configuration and build the client without connecting
    pub fn build(self) -> Result<ConduitClient> {
        ConduitClient::new(self.config, self.handlers, self.hooks)
    }

    /// Build, connect and authenticate
    ///
    /// # Errors
    ///
    /// `ConduitError::Auth` when the server rejects the secret,
    /// `ConduitError::Io` or `ConduitError::Timeout` when it cannot be reached.
    pub async fn connect(self) -> Result<ConduitClient> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
