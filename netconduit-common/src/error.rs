//! Error types for NetConduit

use netconduit_protocol::{ProtocolError, ValidationError};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for NetConduit operations
#[derive(Error, Debug)]
pub enum ConduitError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or payload error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// RPC call failed
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Application handler failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Connection not found
    #[error("Connection not found: {0}")]
    ConnectionNotFound(Uuid),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reconnection gave up
    #[error("Reconnection attempts exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ConduitError>;

impl From<ValidationError> for ConduitError {
    fn from(err: ValidationError) -> Self {
        ConduitError::Protocol(ProtocolError::InvalidPayload(err.to_string()))
    }
}
