//! Handler tables and lifecycle hooks
//!
//! Application code registers async closures keyed by message kind or RPC
//! method name. The tables are frozen once a server or client is built.

use crate::connection::ConnectionHandle;
use crate::rpc::RpcRegistry;
use futures::future::BoxFuture;
use netconduit_common::ConduitError;
use netconduit_protocol::messages::{AppMessage, RpcRequest};
use netconduit_protocol::{Frame, MessageType};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Async callback taking one argument
pub struct Hook<A> {
    f: Arc<dyn Fn(A) -> BoxFuture<'static, ()> + Send + Sync>,
}

impl<A: 'static> Hook<A> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            f: Arc::new(move |arg| Box::pin(f(arg))),
        }
    }

    pub async fn call(&self, arg: A) {
        (self.f)(arg).await;
    }
}

impl<A> Clone for Hook<A> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<A> std::fmt::Debug for Hook<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Hook")
    }
}

/// Run an optional hook
pub(crate) async fn fire<A: 'static>(hook: Option<&Hook<A>>, arg: A) {
    if let Some(hook) = hook {
        hook.call(arg).await;
    }
}

pub type MessageHandler =
    Arc<dyn Fn(ConnectionHandle, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Error hook argument: the connection involved, if any, and the error
pub type ErrorEvent = (Option<ConnectionHandle>, ConduitError);

/// Message handlers, RPC methods and per-connection hooks
#[derive(Default)]
pub struct Handlers {
    messages: HashMap<String, MessageHandler>,
    unhandled: Option<Hook<(ConnectionHandle, AppMessage)>>,
    rpc: RpcRegistry,
    on_heartbeat_timeout: Option<Hook<ConnectionHandle>>,
    on_error: Option<Hook<ErrorEvent>>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle MESSAGE frames of the given application kind
    pub fn on<F, Fut>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(ConnectionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.messages.insert(
            kind.into(),
            Arc::new(move |conn, data| Box::pin(handler(conn, data))),
        );
    }

    /// Fallback for message kinds with no handler
    pub fn on_unhandled<F, Fut>(&mut self, handler: F)
    where
        F: Fn((ConnectionHandle, AppMessage)) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.unhandled = Some(Hook::new(handler));
    }

    /// Expose an RPC method to the peer
    pub fn rpc<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(ConnectionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.rpc.register(method, handler);
    }

    pub fn on_heartbeat_timeout(&mut self, hook: Hook<ConnectionHandle>) {
        self.on_heartbeat_timeout = Some(hook);
    }

    pub fn on_error(&mut self, hook: Hook<ErrorEvent>) {
        self.on_error = Some(hook);
    }

    pub fn rpc_registry(&self) -> &RpcRegistry {
        &self.rpc
    }

    pub fn message_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.messages.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub(crate) async fn heartbeat_timed_out(&self, conn: ConnectionHandle) {
        fire(self.on_heartbeat_timeout.as_ref(), conn).await;
    }

    pub(crate) async fn report_error(&self, conn: Option<ConnectionHandle>, error: ConduitError) {
        fire(self.on_error.as_ref(), (conn, error)).await;
    }

    /// Deliver one admitted application frame.
    ///
    /// MESSAGE handlers run inline, so messages on one connection are handled
    /// in arrival order. RPC requests run on their own task.
    pub(crate) async fn dispatch(self: &Arc<Self>, conn: &ConnectionHandle, frame: Frame) {
        match frame.message_type {
            MessageType::Message => self.dispatch_message(conn, &frame).await,
            MessageType::RpcRequest => {
                let handlers = Arc::clone(self);
                let conn = conn.clone();
                tokio::spawn(async move { handlers.serve_rpc(conn, frame).await });
            }
            other => debug!(message_type = %other, "Not an application frame"),
        }
    }

    async fn dispatch_message(&self, conn: &ConnectionHandle, frame: &Frame) {
        let msg: AppMessage = match frame.body() {
            Ok(msg) => msg,
            Err(e) => {
                warn!(conn_id = %conn.id(), "Undecodable message body: {}", e);
                return;
            }
        };

        let Some(handler) = self.messages.get(&msg.kind) else {
            match &self.unhandled {
                Some(fallback) => fallback.call((conn.clone(), msg)).await,
                None => debug!(conn_id = %conn.id(), kind = %msg.kind, "No handler for message"),
            }
            return;
        };

        if let Err(e) = handler(conn.clone(), msg.data).await {
            warn!(conn_id = %conn.id(), kind = %msg.kind, "Message handler failed: {:#}", e);
            self.report_error(Some(conn.clone()), ConduitError::Handler(format!("{e:#}")))
                .await;
        }
    }

    async fn serve_rpc(&self, conn: ConnectionHandle, frame: Frame) {
        let correlation_id = frame.correlation_id;
        let request: RpcRequest = match frame.body() {
            Ok(req) => req,
            Err(e) => {
                warn!(conn_id = %conn.id(), correlation_id, "Undecodable RPC request: {}", e);
                return;
            }
        };

        #[cfg(feature = "metrics")]
        if let Some(m) = netconduit_observability::conduit_metrics() {
            m.rpc_request(&request.method);
        }

        let reply = match self
            .rpc
            .invoke(conn.clone(), correlation_id, &request.method, request.params)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(conn_id = %conn.id(), method = %request.method, "Unencodable RPC reply: {}", e);
                match Frame::rpc_error(
                    correlation_id,
                    netconduit_protocol::RpcErrorCode::HandlerError,
                    e.to_string(),
                ) {
                    Ok(frame) => frame,
                    Err(_) => return,
                }
            }
        };

        if let Err(e) = conn.send_frame(&reply).await {
            debug!(conn_id = %conn.id(), correlation_id, "Could not deliver RPC reply: {}", e);
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("messages", &self.message_kinds())
            .field("rpc", &self.rpc)
            .finish_non_exhaustive()
    }
}
