//! Common utilities and types for NetConduit

pub mod config;
pub mod constants;
pub mod error;

pub use config::{
    ClientConfig, HeartbeatConfig, LimitsConfig, QueueConfig, RateLimitConfig, ReconnectConfig,
    Secret, ServerConfig, TimeoutConfig, TlsConfig,
};
pub use constants::{DEFAULT_CLIENT_HOST, DEFAULT_PORT, DEFAULT_SERVER_HOST};
pub use error::{ConduitError, Result};
