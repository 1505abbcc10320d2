//! Configuration descriptors for NetConduit servers and clients
//!
//! Every descriptor has a `Default` matching a typical deployment and a
//! `validate()` that rejects inconsistent combinations before anything binds
//! or connects.

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CLIENT_HOST, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS, DEFAULT_MESSAGES_PER_SECOND,
    DEFAULT_PORT, DEFAULT_QUEUE_SIZE, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_SECS,
    DEFAULT_RECONNECT_MAX_DELAY_SECS, DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_SEND_TIMEOUT_SECS,
    DEFAULT_SERVER_HOST,
};
use crate::error::{ConduitError, Result};
use netconduit_protocol::constants::{
    DEFAULT_MAX_MESSAGE_SIZE, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

fn invalid(msg: impl Into<String>) -> ConduitError {
    ConduitError::Config(msg.into())
}

/// Shared secret used by the auth handshake. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS
    pub enabled: bool,
    /// Path to certificate chain (server side)
    pub cert_file: Option<PathBuf>,
    /// Path to private key (server side)
    pub key_file: Option<PathBuf>,
    /// Extra trust anchor (client side)
    pub ca_file: Option<PathBuf>,
    /// Server name for SNI and verification (client side)
    pub server_name: Option<String>,
    /// Verify the server certificate. Disable only for self-signed deployments.
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            server_name: None,
            verify_peer: true,
        }
    }
}

impl TlsConfig {
    /// Server-side checks: a listener needs a certificate and key
    pub fn validate_server(&self) -> Result<()> {
        if self.enabled && (self.cert_file.is_none() || self.key_file.is_none()) {
            return Err(invalid("TLS enabled but cert_file/key_file not set"));
        }
        Ok(())
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections per server
    pub max_connections: usize,
    /// Maximum encoded payload size in bytes (default: 10MB)
    pub max_message_size: usize,
    /// Read buffer size per connection
    pub buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(invalid("max_connections must be greater than 0"));
        }
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(invalid("max_message_size must be in 1..=u32::MAX"));
        }
        if self.buffer_size == 0 {
            return Err(invalid("buffer_size must be greater than 0"));
        }
        Ok(())
    }
}

/// Timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Establishing the transport (TCP connect + TLS)
    pub connection_timeout: Duration,
    /// Completing the auth handshake
    pub handshake_timeout: Duration,
    /// Waiting for space in a full send queue
    pub send_timeout: Duration,
    /// Waiting for an RPC response
    pub rpc_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connection_timeout", self.connection_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("send_timeout", self.send_timeout),
            ("rpc_timeout", self.rpc_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Must be longer than `interval`
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            timeout: Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(invalid("heartbeat interval must be non-zero"));
        }
        if self.timeout <= self.interval {
            return Err(invalid("heartbeat timeout must exceed heartbeat interval"));
        }
        Ok(())
    }
}

/// Per-connection queue depths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub send_queue_size: usize,
    pub receive_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            send_queue_size: DEFAULT_QUEUE_SIZE,
            receive_queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.send_queue_size == 0 || self.receive_queue_size == 0 {
            return Err(invalid("queue sizes must be greater than 0"));
        }
        Ok(())
    }
}

/// Inbound rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Bucket capacity and refill rate
    pub messages_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: DEFAULT_MESSAGES_PER_SECOND,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.messages_per_second == 0 {
            return Err(invalid("messages_per_second must be greater than 0"));
        }
        Ok(())
    }
}

/// Client reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Attempts per outage before giving up
    pub attempts: u32,
    /// Delay before the first attempt
    pub delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub factor: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_RECONNECT_MAX_DELAY_SECS),
            factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.attempts == 0 {
            return Err(invalid("reconnect attempts must be greater than 0"));
        }
        if self.delay > self.max_delay {
            return Err(invalid("reconnect delay exceeds max_delay"));
        }
        if self.factor.is_nan() || self.factor < 1.0 {
            return Err(invalid("reconnect factor must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(invalid("reconnect jitter must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Configuration for a listening server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name reported to clients in AUTH_SUCCESS
    pub name: String,
    pub version: String,
    pub host: String,
    /// Port to bind; 0 picks an ephemeral port
    pub port: u16,
    pub secret: Secret,
    pub tls: TlsConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub heartbeat: HeartbeatConfig,
    pub queues: QueueConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "netconduit-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_PORT,
            secret: Secret::default(),
            tls: TlsConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            queues: QueueConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(invalid("host is required"));
        }
        if self.secret.is_empty() {
            return Err(invalid("secret is required"));
        }
        self.tls.validate_server()?;
        self.limits.validate()?;
        self.timeouts.validate()?;
        self.heartbeat.validate()?;
        self.queues.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

/// Configuration for a connecting client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name reported to the server in AUTH_REQUEST
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub secret: Secret,
    pub tls: TlsConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub heartbeat: HeartbeatConfig,
    pub queues: QueueConfig,
    pub rate_limit: RateLimitConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "netconduit-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: DEFAULT_CLIENT_HOST.to_string(),
            port: DEFAULT_PORT,
            secret: Secret::default(),
            tls: TlsConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            queues: QueueConfig::default(),
            rate_limit: RateLimitConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// `host:port` to connect to
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(invalid("host is required"));
        }
        if self.port == 0 {
            return Err(invalid("port is required"));
        }
        if self.secret.is_empty() {
            return Err(invalid("secret is required"));
        }
        self.limits.validate()?;
        self.timeouts.validate()?;
        self.heartbeat.validate()?;
        self.queues.validate()?;
        self.rate_limit.validate()?;
        self.reconnect.validate()?;
        Ok(())
    }
}
