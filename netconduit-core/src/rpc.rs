//! RPC correlation: pending-call table and method registry

use crate::connection::ConnectionHandle;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use netconduit_common::ConduitError;
use netconduit_protocol::messages::{RpcErrorCode, RpcErrorPayload, RpcResponse};
use netconduit_protocol::{Frame, MessageType};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// RPC errors reported to the calling side
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("remote error ({code:?}): {message}")]
    Remote { code: RpcErrorCode, message: String },
    #[error("rpc call timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("failed to send request: {0}")]
    Send(String),
}

impl From<RpcError> for ConduitError {
    fn from(err: RpcError) -> Self {
        ConduitError::Rpc(err.to_string())
    }
}

type CallResult = Result<Value, RpcError>;

/// Per-connection table of calls awaiting a response
#[derive(Debug)]
pub struct PendingCalls {
    next_id: AtomicU64,
    /// Waiters keyed by correlation id; the caller owns the deadline
    calls: DashMap<u64, oneshot::Sender<CallResult>>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            calls: DashMap::new(),
        }
    }

    /// Allocate a correlation id unique among pending calls and register a waiter
    pub fn register(&self) -> (PendingGuard<'_>, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let mut waiter = Some(tx);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // zero is reserved for uncorrelated frames
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.calls.entry(id) {
                if let Some(waiter) = waiter.take() {
                    slot.insert(waiter);
                }
                return (PendingGuard { calls: self, id }, rx);
            }
        }
    }

    /// Route an RPC_RESPONSE / RPC_ERROR frame to its waiter.
    /// Returns false when no call is pending under that id.
    pub fn resolve(&self, frame: &Frame) -> bool {
        let Some((_, waiter)) = self.calls.remove(&frame.correlation_id) else {
            debug!(
                correlation_id = frame.correlation_id,
                "Dropping response with no pending call"
            );
            return false;
        };

        let result = match frame.message_type {
            MessageType::RpcResponse => frame
                .body::<RpcResponse>()
                .map(|r| r.result)
                .map_err(|e| RpcError::Handler(e.to_string())),
            MessageType::RpcError => match frame.body::<RpcErrorPayload>() {
                Ok(err) if err.code == RpcErrorCode::MethodNotFound => {
                    Err(RpcError::MethodNotFound(err.message))
                }
                Ok(err) => Err(RpcError::Remote {
                    code: err.code,
                    message: err.message,
                }),
                Err(e) => Err(RpcError::Handler(e.to_string())),
            },
            other => Err(RpcError::Handler(format!("unexpected {other} reply"))),
        };

        // The caller may have given up already
        let _ = waiter.send(result);
        true
    }

    /// Fail every pending call with `ConnectionClosed`
    pub fn cancel_all(&self) {
        let ids: Vec<u64> = self.calls.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.calls.remove(&id) {
                let _ = waiter.send(Err(RpcError::ConnectionClosed));
            }
        }
    }

    pub fn remove(&self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Purges its pending entry when dropped (resolved, timed out or abandoned)
#[derive(Debug)]
pub struct PendingGuard<'a> {
    calls: &'a PendingCalls,
    id: u64,
}

impl PendingGuard<'_> {
    pub fn correlation_id(&self) -> u64 {
        self.id
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.calls.remove(self.id);
    }
}

/// Application RPC method
pub type RpcHandler =
    Arc<dyn Fn(ConnectionHandle, Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Method name to handler table, fixed once a server or client is built
#[derive(Clone, Default)]
pub struct RpcRegistry {
    methods: HashMap<String, RpcHandler>,
}

impl RpcRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method, replacing any previous handler with the same name
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(ConnectionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.methods.insert(
            name.into(),
            Arc::new(move |conn, params| Box::pin(handler(conn, params))),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a method and build the reply frame carrying `correlation_id`
    pub async fn invoke(
        &self,
        conn: ConnectionHandle,
        correlation_id: u64,
        method: &str,
        params: Value,
    ) -> Result<Frame, netconduit_protocol::ProtocolError> {
        let Some(handler) = self.methods.get(method).cloned() else {
            debug!(method, "RPC method not found");
            return Frame::rpc_error(
                correlation_id,
                RpcErrorCode::MethodNotFound,
                "method not found",
            );
        };

        match handler(conn, params).await {
            Ok(result) => Frame::rpc_response(correlation_id, result),
            Err(e) => {
                debug!(method, error = %e, "RPC handler failed");
                Frame::rpc_error(correlation_id, RpcErrorCode::HandlerError, format!("{e:#}"))
            }
        }
    }
}

impl std::fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRegistry")
            .field("methods", &self.method_names())
            .finish()
    }
}
