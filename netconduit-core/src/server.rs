//! Accepting side: listener, connection registry, broadcast

use crate::auth::Authenticator;
use crate::connection::{
    Connection, ConnectionContext, ConnectionHandle, ConnectionInfo, ConnectionRegistry,
    DisconnectReason, Role, ServerState, StateCell,
};
use crate::dispatch::{fire, Handlers, Hook};
use crate::resource_limits::{ConnectionLimiter, ConnectionPermit};
use crate::rpc::RpcError;
use crate::transport::{Listener, Upgrader};
use futures::future::join_all;
use netconduit_common::{ConduitError, Result, ServerConfig};
use netconduit_protocol::Frame;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pause after a failed accept, e.g. when the process is out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server lifecycle hooks
#[derive(Clone, Default)]
pub struct ServerHooks {
    pub on_connect: Option<Hook<ConnectionHandle>>,
    pub on_disconnect: Option<Hook<(ConnectionHandle, DisconnectReason)>>,
}

struct ServerInner {
    config: ServerConfig,
    ctx: ConnectionContext,
    hooks: ServerHooks,
    state: StateCell<ServerState>,
    registry: ConnectionRegistry,
    limiter: ConnectionLimiter,
    cancel: CancellationToken,
    tracker: TaskTracker,
    /// Cancelled once the server reaches CLOSED
    stopped: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
    started_at: OnceLock<Instant>,
    /// Byte totals of connections that already closed
    retired_sent: AtomicU64,
    retired_received: AtomicU64,
}

/// NetConduit server.
///
/// Cheap to clone; clones share the same listener and registry.
#[derive(Clone)]
pub struct ConduitServer {
    inner: Arc<ServerInner>,
}

impl ConduitServer {
    pub fn new(config: ServerConfig, handlers: Handlers, hooks: ServerHooks) -> Result<Self> {
        config.validate()?;
        let ctx = ConnectionContext::for_server(&config, Arc::new(handlers));

        Ok(Self {
            inner: Arc::new(ServerInner {
                limiter: ConnectionLimiter::new(config.limits.max_connections),
                config,
                ctx,
                hooks,
                state: StateCell::new(ServerState::Created),
                registry: ConnectionRegistry::new(),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                stopped: CancellationToken::new(),
                local_addr: OnceLock::new(),
                started_at: OnceLock::new(),
                retired_sent: AtomicU64::new(0),
                retired_received: AtomicU64::new(0),
            }),
        })
    }

    /// Bind the listener and start accepting. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let inner = &self.inner;
        if !inner
            .state
            .transition(ServerState::Created, ServerState::Initializing)
        {
            return Err(ConduitError::InvalidState(format!(
                "cannot start a server that is {}",
                inner.state.get().as_str()
            )));
        }

        let listener = match Listener::bind(&inner.config).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {}: {}", inner.config.bind_addr(), e);
                inner.state.advance(ServerState::Closed);
                inner.stopped.cancel();
                return Err(e);
            }
        };
        let addr = listener.local_addr()?;

        if !inner.state.advance(ServerState::Running) {
            return Err(ConduitError::InvalidState(
                "server stopped during startup".into(),
            ));
        }
        let _ = inner.local_addr.set(addr);
        let _ = inner.started_at.set(Instant::now());

        info!(
            addr = %addr,
            tls = listener.is_tls(),
            max_connections = inner.config.limits.max_connections,
            "Server listening"
        );
        inner
            .tracker
            .spawn(Arc::clone(inner).accept_loop(listener));
        Ok(addr)
    }

    /// Stop accepting, close every connection and wait for all of them
    /// to tear down
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner
            .state
            .transition(ServerState::Created, ServerState::Closed)
        {
            inner.stopped.cancel();
            return;
        }
        if !inner.state.advance(ServerState::Stopping) {
            // another caller is already stopping
            inner.stopped.cancelled().await;
            return;
        }

        info!(connections = inner.registry.len(), "Stopping server");
        inner.cancel.cancel();
        inner.tracker.close();
        inner.tracker.wait().await;

        inner.state.advance(ServerState::Closed);
        inner.stopped.cancel();
        info!("Server stopped");
    }

    pub async fn wait_until_stopped(&self) {
        self.inner.stopped.cancelled().await;
    }

    pub fn state(&self) -> ServerState {
        self.inner.state.get()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn uptime(&self) -> Duration {
        self.inner
            .started_at
            .get()
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(ConnectionHandle::info)
            .collect()
    }

    pub fn connection(&self, id: &Uuid) -> Option<ConnectionHandle> {
        self.inner.registry.get(id)
    }

    pub fn total_bytes_sent(&self) -> u64 {
        let live: u64 = self
            .inner
            .registry
            .snapshot()
            .iter()
            .map(|c| c.health().bytes_sent)
            .sum();
        self.inner.retired_sent.load(Ordering::Relaxed) + live
    }

    pub fn total_bytes_received(&self) -> u64 {
        let live: u64 = self
            .inner
            .registry
            .snapshot()
            .iter()
            .map(|c| c.health().bytes_received)
            .sum();
        self.inner.retired_received.load(Ordering::Relaxed) + live
    }

    /// Registered RPC method names, sorted
    pub fn method_names(&self) -> Vec<String> {
        self.inner.ctx.handlers.rpc_registry().method_names()
    }

    /// Send one MESSAGE to every ACTIVE connection not in `exclude`.
    ///
    /// The frame is encoded once. A failing connection does not affect
    /// delivery to the others. Returns the number of successful deliveries.
    pub async fn broadcast(&self, kind: &str, data: Value, exclude: &[Uuid]) -> Result<usize> {
        let frame = Frame::message(kind, data)?;
        let bytes = self.inner.ctx.codec.encode_frame(&frame)?;

        let targets: Vec<ConnectionHandle> = self
            .inner
            .registry
            .active()
            .into_iter()
            .filter(|conn| !exclude.contains(&conn.id()))
            .collect();

        let results = join_all(targets.iter().map(|conn| conn.send_encoded(bytes.clone()))).await;

        let mut delivered = 0;
        for (conn, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => debug!(conn_id = %conn.id(), kind, "Broadcast delivery failed: {}", e),
            }
        }
        debug!(kind, delivered, targets = targets.len(), "Broadcast sent");
        Ok(delivered)
    }

    pub async fn send_to(&self, id: &Uuid, kind: &str, data: Value) -> Result<()> {
        self.lookup(id)?.send(kind, data).await
    }

    pub async fn rpc_call(&self, id: &Uuid, method: &str, params: Value) -> Result<Value> {
        let conn = self.lookup(id)?;
        conn.rpc_call(method, params)
            .await
            .map_err(ConduitError::from)
    }

    /// Like [`rpc_call`](Self::rpc_call), keeping the typed RPC error
    pub async fn try_rpc_call(
        &self,
        id: &Uuid,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, RpcError> {
        match self.inner.registry.get(id) {
            Some(conn) => conn.rpc_call(method, params).await,
            None => Err(RpcError::ConnectionClosed),
        }
    }

    /// Close one connection
    pub fn disconnect(&self, id: &Uuid) -> Result<()> {
        self.lookup(id)?.close();
        Ok(())
    }

    fn lookup(&self, id: &Uuid) -> Result<ConnectionHandle> {
        self.inner
            .registry
            .get(id)
            .ok_or(ConduitError::ConnectionNotFound(*id))
    }
}

impl ServerInner {
    async fn accept_loop(self: Arc<Self>, listener: Listener) {
        let upgrader = listener.upgrader();

        loop {
            let accepted = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let permit = match self.limiter.try_acquire() {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(peer = %peer, "Rejecting connection: {}", e);
                    continue;
                }
            };

            debug!(peer = %peer, "Accepted connection");
            let inner = Arc::clone(&self);
            let upgrader = upgrader.clone();
            self.tracker
                .spawn(inner.serve(stream, peer, upgrader, permit));
        }

        debug!("Accept loop stopped");
    }

    async fn serve(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        upgrader: Upgrader,
        _permit: ConnectionPermit,
    ) {
        let upgraded = tokio::select! {
            () = self.cancel.cancelled() => return,
            upgraded = tokio::time::timeout(
                self.config.timeouts.handshake_timeout,
                upgrader.upgrade(stream),
            ) => upgraded,
        };
        let stream = match upgraded {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(peer = %peer, "Transport setup failed: {}", e);
                self.ctx.handlers.report_error(None, e).await;
                return;
            }
            Err(_) => {
                warn!(peer = %peer, "TLS handshake timed out");
                return;
            }
        };

        let mut conn = Connection::new(stream, peer, self.ctx.clone(), self.cancel.child_token());
        let role = Role::Server {
            authenticator: Authenticator::new(self.config.secret.expose()),
            name: self.config.name.clone(),
            version: self.config.version.clone(),
        };
        if let Err(reason) = conn.handshake(role).await {
            let reason = conn.abort(reason).await;
            debug!(peer = %peer, reason = %reason, "Handshake did not complete");
            return;
        }

        let handle = conn.handle().clone();
        self.registry.insert(handle.clone());

        let on_connect = self.hooks.on_connect.clone();
        let connected = handle.clone();
        let reason = conn
            .run(async move { fire(on_connect.as_ref(), connected).await })
            .await;

        self.registry.remove(&handle.id());
        let health = handle.health();
        self.retired_sent
            .fetch_add(health.bytes_sent, Ordering::Relaxed);
        self.retired_received
            .fetch_add(health.bytes_received, Ordering::Relaxed);

        fire(self.hooks.on_disconnect.as_ref(), (handle, reason)).await;
    }
}

impl std::fmt::Debug for ConduitServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConduitServer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, ConnectionStats};
    use bytes::Bytes;
    use kanal::AsyncReceiver;
    use netconduit_protocol::{AppMessage, ConduitCodec, FrameBuffer};
    use serde_json::json;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            secret: "test-secret".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_is_forward_only() {
        let server = ConduitServer::new(config(), Handlers::new(), ServerHooks::default()).unwrap();
        assert_eq!(server.state(), ServerState::Created);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), ServerState::Running);
        assert_eq!(server.local_addr(), Some(addr));

        assert!(matches!(
            server.start().await,
            Err(ConduitError::InvalidState(_))
        ));

        server.stop().await;
        assert_eq!(server.state(), ServerState::Closed);
        server.wait_until_stopped().await;

        // stopping twice is harmless
        server.stop().await;
        assert!(server.start().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let server = ConduitServer::new(config(), Handlers::new(), ServerHooks::default()).unwrap();
        server.stop().await;
        assert_eq!(server.state(), ServerState::Closed);
        assert!(server.start().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let server = ConduitServer::new(config(), Handlers::new(), ServerHooks::default()).unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            server.disconnect(&id),
            Err(ConduitError::ConnectionNotFound(missing)) if missing == id
        ));
        assert_eq!(
            server.broadcast("news", Value::Null, &[]).await.unwrap(),
            0
        );
    }

    /// An ACTIVE handle whose outbound queue the test drains by hand
    fn queued_handle(capacity: usize) -> (ConnectionHandle, AsyncReceiver<Bytes>) {
        let (tx, rx) = kanal::bounded_async(capacity);
        let handle = ConnectionHandle::new(
            Uuid::new_v4(),
            "127.0.0.1:9".parse().unwrap(),
            tx,
            Arc::new(ConnectionStats::default()),
            ConduitCodec::new(),
            CancellationToken::new(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        handle.advance(ConnectionState::Active);
        (handle, rx)
    }

    fn message_kind(bytes: &Bytes) -> String {
        let mut buffer = FrameBuffer::default();
        buffer.feed(bytes);
        let frame = buffer.decode_one().unwrap().unwrap();
        frame.body::<AppMessage>().unwrap().kind
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failed_delivery() {
        let server = ConduitServer::new(config(), Handlers::new(), ServerHooks::default()).unwrap();
        let registry = &server.inner.registry;

        let (healthy_a, rx_a) = queued_handle(8);
        let (healthy_b, rx_b) = queued_handle(8);
        // writer gone: the queue is closed
        let (gone, rx_gone) = queued_handle(8);
        drop(rx_gone);
        // writer stuck: the queue stays full past the send timeout
        let (stalled, _rx_stalled) = queued_handle(1);
        stalled.send("backlog", Value::Null).await.unwrap();

        for conn in [&healthy_a, &healthy_b, &gone, &stalled] {
            registry.insert(conn.clone());
        }

        let delivered = server
            .broadcast("news", json!({ "headline": "hello" }), &[])
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        for rx in [&rx_a, &rx_b] {
            let bytes = rx.try_recv().unwrap().expect("healthy target got nothing");
            assert_eq!(message_kind(&bytes), "news");
        }
        assert_eq!(
            stalled.disconnect_reason(),
            Some(DisconnectReason::Unresponsive)
        );
        assert!(healthy_a.is_active() && !healthy_a.is_closed());
        assert!(!healthy_b.is_closed());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut bad = config();
        bad.limits.max_connections = 0;
        assert!(ConduitServer::new(bad, Handlers::new(), ServerHooks::default()).is_err());
    }
}
