//! Per-connection state, handles and the driver task

mod driver;
pub mod reason;
pub mod registry;
pub mod state;
pub mod stats;

pub(crate) use driver::{Connection, ConnectionContext, Role};
pub use reason::DisconnectReason;
pub use registry::ConnectionRegistry;
pub use state::{ConnectionState, Lifecycle, ServerState, StateCell};
pub use stats::{ConnectionHealth, ConnectionStats};

use crate::rpc::{PendingCalls, RpcError};
use bytes::Bytes;
use kanal::AsyncSender;
use netconduit_common::{ConduitError, Result};
use netconduit_protocol::{ConduitCodec, Frame};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Summary of a live connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer_addr: SocketAddr,
    pub connected_at: SystemTime,
    pub state: ConnectionState,
    pub client_name: Option<String>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

struct ConnectionShared {
    id: Uuid,
    peer_addr: SocketAddr,
    connected_at: SystemTime,
    state: StateCell<ConnectionState>,
    stats: Arc<ConnectionStats>,
    outbound: AsyncSender<Bytes>,
    codec: ConduitCodec,
    pending: PendingCalls,
    cancel: CancellationToken,
    send_timeout: Duration,
    rpc_timeout: Duration,
    /// First reason recorded wins
    reason: Mutex<Option<DisconnectReason>>,
    session_token: OnceLock<String>,
    client_name: OnceLock<String>,
}

/// Cloneable reference to one connection.
///
/// Handles never own the socket; every action is routed through the
/// connection's queues and cancellation token.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: Uuid,
        peer_addr: SocketAddr,
        outbound: AsyncSender<Bytes>,
        stats: Arc<ConnectionStats>,
        codec: ConduitCodec,
        cancel: CancellationToken,
        send_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionShared {
                id,
                peer_addr,
                connected_at: SystemTime::now(),
                state: StateCell::new(ConnectionState::Connecting),
                stats,
                outbound,
                codec,
                pending: PendingCalls::new(),
                cancel,
                send_timeout,
                rpc_timeout,
                reason: Mutex::new(None),
                session_token: OnceLock::new(),
                client_name: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn session_token(&self) -> Option<&str> {
        self.inner.session_token.get().map(String::as_str)
    }

    pub fn health(&self) -> ConnectionHealth {
        self.inner.stats.snapshot(self.state())
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.inner.id,
            peer_addr: self.inner.peer_addr,
            connected_at: self.inner.connected_at,
            state: self.state(),
            client_name: self.inner.client_name.get().cloned(),
            bytes_sent: self.inner.stats.bytes_sent(),
            bytes_received: self.inner.stats.bytes_received(),
        }
    }

    /// Send an application MESSAGE of the given kind
    pub async fn send(&self, kind: &str, data: Value) -> Result<()> {
        let frame = Frame::message(kind, data)?;
        self.send_frame(&frame).await
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = self.inner.codec.encode_frame(frame)?;
        self.send_encoded(bytes).await
    }

    /// Queue pre-encoded frame bytes.
    ///
    /// Waits up to the send timeout for queue space; a peer that stays
    /// behind that long is closed as unresponsive.
    pub async fn send_encoded(&self, bytes: Bytes) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(ConduitError::Connection("connection closed".into()));
        }

        match tokio::time::timeout(self.inner.send_timeout, self.inner.outbound.send(bytes)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConduitError::Connection("connection closed".into())),
            Err(_) => {
                warn!(conn_id = %self.inner.id, "Send queue full past timeout, closing");
                self.close_with(DisconnectReason::Unresponsive);
                Err(ConduitError::Timeout("send queue full".into()))
            }
        }
    }

    /// Call a method on the peer using the configured RPC timeout
    pub async fn rpc_call(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        self.rpc_call_with_timeout(method, params, self.inner.rpc_timeout)
            .await
    }

    pub async fn rpc_call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, RpcError> {
        if self.inner.cancel.is_cancelled() {
            return Err(RpcError::ConnectionClosed);
        }

        let deadline = Instant::now() + timeout;
        let (guard, rx) = self.inner.pending.register();
        let correlation_id = guard.correlation_id();

        let frame = Frame::rpc_request(correlation_id, method, params)
            .map_err(|e| RpcError::Send(e.to_string()))?;
        self.send_frame(&frame)
            .await
            .map_err(|e| RpcError::Send(e.to_string()))?;

        let result = match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            // waiter dropped without an answer
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                debug!(conn_id = %self.inner.id, method, correlation_id, "RPC call timed out");
                #[cfg(feature = "metrics")]
                if let Some(m) = netconduit_observability::conduit_metrics() {
                    m.rpc_timeout();
                }
                Err(RpcError::Timeout)
            }
        };
        drop(guard);
        result
    }

    /// Close the connection from this side
    pub fn close(&self) {
        self.close_with(DisconnectReason::LocalClose);
    }

    pub(crate) fn close_with(&self, reason: DisconnectReason) {
        if let Ok(mut slot) = self.inner.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the connection starts tearing down
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.inner.reason.lock().ok().and_then(|slot| slot.clone())
    }

    pub(crate) fn advance(&self, state: ConnectionState) -> bool {
        self.inner.state.advance(state)
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.inner.pending
    }

    pub(crate) fn stats(&self) -> &ConnectionStats {
        &self.inner.stats
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub(crate) fn set_session(&self, token: String, client_name: Option<String>) {
        let _ = self.inner.session_token.set(token);
        if let Some(name) = client_name {
            let _ = self.inner.client_name.set(name);
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ConnectionHandle {}
