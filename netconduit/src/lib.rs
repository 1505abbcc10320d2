//! # NetConduit
//!
//! Secure bidirectional messaging and RPC between a server and many clients
//! over TCP or TLS.
//!
//! ## Overview
//!
//! Every connection authenticates once with a shared secret and then carries
//! fire-and-forget messages and request/response RPC in both directions.
//! Both peers ping each other, inbound traffic is rate limited per
//! connection, and clients reconnect with exponential backoff after an
//! unexpected loss.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netconduit::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> netconduit::Result<()> {
//! let server = ServerBuilder::new()
//!     .port(0)
//!     .secret("echo_secret")
//!     .rpc("echo", |_conn, params| async move { Ok(params) })
//!     .start()
//!     .await?;
//! let port = server.local_addr().map(|a| a.port()).unwrap_or_default();
//!
//! let client = ClientBuilder::new()
//!     .server("127.0.0.1", port)
//!     .secret("echo_secret")
//!     .connect()
//!     .await?;
//! let reply = client.rpc_call("echo", json!({ "message": "hi" })).await?;
//! assert_eq!(reply["message"], "hi");
//!
//! client.disconnect().await;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`netconduit-protocol`] - frame header, message types, payload codec
//! - [`netconduit-common`] - configuration and errors
//! - [`netconduit-core`] - transport, connections, server and client
//!
//! This crate re-exports the most commonly used items and adds builders.

mod client;
mod server;

// Re-export subcrates
pub use netconduit_common as common;
pub use netconduit_protocol as protocol;
pub use netconduit_core;

pub use client::ClientBuilder;
pub use server::ServerBuilder;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::ClientBuilder;
    pub use crate::server::ServerBuilder;

    pub use crate::common::{ClientConfig, ConduitError, Result, ServerConfig, TlsConfig};
    pub use netconduit_core::{
        ConduitClient, ConduitServer, ConnectionHandle, ConnectionHealth, ConnectionInfo,
        ConnectionState, DisconnectReason, RpcError, ServerState,
    };
    pub use crate::protocol::{AppMessage, Frame, MessageType};
}

// Convenience re-exports at crate root
pub use common::{ClientConfig, ConduitError, Result, ServerConfig, TlsConfig};
pub use netconduit_core::{
    ConduitClient, ConduitServer, ConnectionHandle, ConnectionHealth, ConnectionInfo,
    ConnectionState, DisconnectReason, RpcError, ServerState,
};
