//! Connection machinery for NetConduit
//!
//! [`ConduitServer`] accepts connections and [`ConduitClient`] initiates
//! them; both drive every connection through the same handshake,
//! heartbeat, rate limiting and RPC correlation code.

pub mod auth;
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod rate_limit;
pub mod reconnect;
pub mod resource_limits;
pub mod rpc;
pub mod server;
pub mod transport;

pub use client::{ClientHooks, ConduitClient};
pub use connection::{
    ConnectionHandle, ConnectionHealth, ConnectionInfo, ConnectionState, DisconnectReason,
    ServerState,
};
pub use dispatch::{Handlers, Hook};
pub use rpc::RpcError;
pub use server::{ConduitServer, ServerHooks};
