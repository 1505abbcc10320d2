//! Protocol constants

/// Frame magic, `CNDT`
pub const MAGIC: [u8; 4] = *b"CNDT";

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Header size: magic(4) + version(1) + type(1) + correlation id(8) + payload length(4)
pub const HEADER_LEN: usize = 18;

/// Default maximum payload size (10MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Heartbeat interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Heartbeat timeout in seconds
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 90;
