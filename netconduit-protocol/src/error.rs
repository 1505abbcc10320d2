//! Protocol-level errors. Every variant is fatal for the connection it occurred on.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("bad frame magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("payload decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A previous decode failed; the reassembly buffer can no longer be trusted
    #[error("frame buffer poisoned by earlier error: {0}")]
    Poisoned(String),
}

impl ProtocolError {
    /// Short machine-friendly label, used in disconnect reasons and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadMagic(_) => "bad_magic",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::UnknownMessageType(_) => "unknown_message_type",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Encode(_) => "encode",
            Self::Decode(_) => "decode",
            Self::Io(_) => "io",
            Self::Poisoned(_) => "poisoned",
        }
    }
}
