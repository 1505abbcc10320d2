//! Default values shared by servers, clients and their builders.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! across the library and its tests.

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default host a server binds to.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default host a client connects to.
pub const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";

/// Default cap on concurrent connections per server.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default size of the per-connection read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default timeout for establishing the transport.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Default deadline for receiving AUTH_REQUEST / AUTH_SUCCESS.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Default bound on how long a send may wait for queue space.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;

/// Default RPC call deadline.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// Default send/receive queue depth.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Default inbound application messages per second.
pub const DEFAULT_MESSAGES_PER_SECOND: u32 = 100;

/// Default reconnect attempts before giving up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;

/// Default upper bound on a single reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY_SECS: u64 = 60;
