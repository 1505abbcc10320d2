//! Initiating side: connect, authenticate, reconnect on unexpected loss

use crate::auth::hash_secret;
use crate::connection::{
    Connection, ConnectionContext, ConnectionHandle, ConnectionHealth, DisconnectReason, Role,
};
use crate::dispatch::{fire, Handlers, Hook};
use crate::reconnect::ReconnectManager;
use crate::rpc::RpcError;
use crate::transport::Connector;
use netconduit_common::{ClientConfig, ConduitError, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Client lifecycle hooks
#[derive(Clone, Default)]
pub struct ClientHooks {
    pub on_connect: Option<Hook<ConnectionHandle>>,
    pub on_disconnect: Option<Hook<DisconnectReason>>,
    /// Receives the 1-based attempt number that succeeded
    pub on_reconnect: Option<Hook<u32>>,
    pub on_error: Option<Hook<ConduitError>>,
}

struct ClientInner {
    config: ClientConfig,
    ctx: ConnectionContext,
    hooks: ClientHooks,
    connector: Connector,
    secret_hash: String,
    /// Current connection, `None` while disconnected or reconnecting
    current: watch::Sender<Option<ConnectionHandle>>,
    /// Set once a session ends for good
    terminal: watch::Sender<Option<DisconnectReason>>,
    /// Cancels the running session, reconnect loop included
    session: Mutex<CancellationToken>,
    running: AtomicBool,
}

/// NetConduit client.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConduitClient {
    inner: Arc<ClientInner>,
}

impl ConduitClient {
    pub fn new(config: ClientConfig, handlers: Handlers, hooks: ClientHooks) -> Result<Self> {
        config.validate()?;
        let connector = Connector::new(&config)?;
        let ctx = ConnectionContext::for_client(&config, Arc::new(handlers));
        let secret_hash = hash_secret(config.secret.expose());

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                ctx,
                hooks,
                connector,
                secret_hash,
                current: watch::Sender::new(None),
                terminal: watch::Sender::new(None),
                session: Mutex::new(CancellationToken::new()),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Connect and authenticate.
    ///
    /// Fails with `ConduitError::Auth` when the server rejects the secret and
    /// with `ConduitError::Timeout` when the server cannot be reached in time.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::AcqRel) {
            return Err(ConduitError::InvalidState("client already connected".into()));
        }

        let cancel = inner.fresh_session()?;
        let conn = match inner.establish(&cancel).await {
            Ok(conn) => conn,
            Err(e) => {
                inner.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let handle = conn.handle().clone();
        inner.terminal.send_replace(None);
        inner.current.send_replace(Some(handle.clone()));
        info!(
            server = %inner.connector.addr(),
            conn_id = %handle.id(),
            "Connected"
        );

        tokio::spawn(Arc::clone(inner).supervise(conn, cancel));
        Ok(())
    }

    /// Close the connection on purpose. Never triggers a reconnect.
    pub async fn disconnect(&self) {
        let running = self.inner.running.load(Ordering::Acquire);
        if let Ok(session) = self.inner.session.lock() {
            session.cancel();
        }
        if let Some(conn) = self.connection() {
            conn.close();
        }
        if running {
            self.wait_for_disconnect().await;
        }
    }

    /// Resolves with the reason the session ended for good: an explicit
    /// disconnect, a loss that is not retried, or `ReconnectExhausted`
    pub async fn wait_for_disconnect(&self) -> DisconnectReason {
        let mut terminal = self.inner.terminal.subscribe();
        let reason = match terminal.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(DisconnectReason::LocalClose),
            Err(_) => DisconnectReason::LocalClose,
        };
        reason
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.inner.current.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .current
            .borrow()
            .as_ref()
            .is_some_and(ConnectionHandle::is_active)
    }

    pub fn session_token(&self) -> Option<String> {
        self.connection()
            .and_then(|conn| conn.session_token().map(str::to_owned))
    }

    pub fn health(&self) -> Option<ConnectionHealth> {
        self.connection().map(|conn| conn.health())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub async fn send(&self, kind: &str, data: Value) -> Result<()> {
        match self.connection() {
            Some(conn) => conn.send(kind, data).await,
            None => Err(ConduitError::Connection("not connected".into())),
        }
    }

    pub async fn rpc_call(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        match self.connection() {
            Some(conn) => conn.rpc_call(method, params).await,
            None => Err(RpcError::ConnectionClosed),
        }
    }
}

impl ClientInner {
    fn fresh_session(&self) -> Result<CancellationToken> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| ConduitError::InvalidState("session lock poisoned".into()))?;
        if session.is_cancelled() {
            *session = CancellationToken::new();
        }
        Ok(session.clone())
    }

    /// Transport, TLS and handshake in one step
    async fn establish(&self, cancel: &CancellationToken) -> Result<Connection> {
        let (stream, peer) = self.connector.connect().await?;

        let mut conn = Connection::new(stream, peer, self.ctx.clone(), cancel.child_token());
        let role = Role::Client {
            secret_hash: self.secret_hash.clone(),
            name: self.config.name.clone(),
            version: self.config.version.clone(),
        };

        match conn.handshake(role).await {
            Ok(()) => Ok(conn),
            Err(reason) => Err(match conn.abort(reason).await {
                DisconnectReason::AuthFailed(detail) => ConduitError::Auth(detail),
                DisconnectReason::HandshakeTimeout => {
                    ConduitError::Timeout("waiting for AUTH_SUCCESS".into())
                }
                other => ConduitError::Connection(other.to_string()),
            }),
        }
    }

    /// Hooks for a fresh session, run once its read loop is up
    fn activated(
        &self,
        handle: ConnectionHandle,
        attempt: Option<u32>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let hooks = self.hooks.clone();
        async move {
            if let Some(attempt) = attempt {
                fire(hooks.on_reconnect.as_ref(), attempt).await;
            }
            fire(hooks.on_connect.as_ref(), handle).await;
        }
    }

    async fn supervise(self: Arc<Self>, mut conn: Connection, cancel: CancellationToken) {
        let mut manager = ReconnectManager::from_config(&self.config.reconnect);
        let mut attempt = None;

        loop {
            let on_active = self.activated(conn.handle().clone(), attempt.take());
            let reason = conn.run(on_active).await;
            self.current.send_replace(None);
            fire(self.hooks.on_disconnect.as_ref(), reason.clone()).await;

            let retry = reason.is_unexpected()
                && self.config.reconnect.enabled
                && !cancel.is_cancelled();
            if !retry {
                info!(reason = %reason, "Disconnected");
                self.finish(reason);
                return;
            }

            warn!(reason = %reason, "Connection lost, reconnecting");
            match self.reconnect(&mut manager, &cancel).await {
                Some((next, succeeded)) => {
                    conn = next;
                    attempt = Some(succeeded);
                }
                None if cancel.is_cancelled() => {
                    self.finish(DisconnectReason::LocalClose);
                    return;
                }
                None => {
                    warn!(attempts = manager.attempts(), "Reconnection attempts exhausted");
                    let reason = DisconnectReason::ReconnectExhausted;
                    fire(self.hooks.on_disconnect.as_ref(), reason.clone()).await;
                    self.finish(reason);
                    return;
                }
            }
        }
    }

    async fn reconnect(
        &self,
        manager: &mut ReconnectManager,
        cancel: &CancellationToken,
    ) -> Option<(Connection, u32)> {
        while let Some(delay) = manager.next_attempt() {
            let attempt = manager.attempts();
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");

            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            manager.start_reconnect();

            match self.establish(cancel).await {
                Ok(conn) => {
                    manager.on_connected();
                    let handle = conn.handle().clone();
                    self.current.send_replace(Some(handle.clone()));
                    info!(attempt, conn_id = %handle.id(), "Reconnected");
                    return Some((conn, attempt));
                }
                Err(e) => {
                    warn!(attempt, "Reconnect attempt failed: {}", e);
                    fire(self.hooks.on_error.as_ref(), e).await;
                }
            }
        }
        None
    }

    fn finish(&self, reason: DisconnectReason) {
        self.current.send_replace(None);
        self.running.store(false, Ordering::Release);
        self.terminal.send_replace(Some(reason));
    }
}

impl std::fmt::Debug for ConduitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConduitClient")
            .field("server", &self.inner.connector.addr())
            .field("connected", &self.is_connected())
            .finish()
    }
}
