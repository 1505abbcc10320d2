//! Connection driver: handshake, read loop, timers and teardown
//!
//! One driver task owns the read half of the stream. A writer task owns the
//! write half and a dispatch task runs application handlers, so a slow
//! handler never stalls heartbeats.

use super::{ConnectionHandle, ConnectionState, ConnectionStats, DisconnectReason};
use crate::auth::{generate_session_token, Authenticator};
use crate::dispatch::Handlers;
use crate::heartbeat::{unix_millis, HeartbeatMonitor};
use crate::rate_limit::MessageRateLimiter;
use crate::transport::{run_writer, BoxedStream};
use kanal::{AsyncReceiver, AsyncSender};
use netconduit_common::{ClientConfig, HeartbeatConfig, ServerConfig};
use netconduit_protocol::{
    validate_frame, AuthFailure, AuthRequest, AuthSuccess, ConduitCodec, Frame, FrameBuffer,
    MessageType, ValidationLimits,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Settings shared by every connection of one server or client
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) handlers: Arc<Handlers>,
    pub(crate) codec: ConduitCodec,
    pub(crate) limits: ValidationLimits,
    pub(crate) buffer_size: usize,
    pub(crate) send_queue_size: usize,
    pub(crate) receive_queue_size: usize,
    pub(crate) handshake_timeout: Duration,
    pub(crate) send_timeout: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) heartbeat: HeartbeatConfig,
    /// Inbound messages per second, `None` when unlimited
    pub(crate) rate_limit: Option<u32>,
    /// Reported when the owner's token cancels the connection
    pub(crate) shutdown_reason: DisconnectReason,
}

impl ConnectionContext {
    pub(crate) fn for_server(config: &ServerConfig, handlers: Arc<Handlers>) -> Self {
        Self {
            handlers,
            codec: ConduitCodec::with_max_message_size(config.limits.max_message_size),
            limits: ValidationLimits::default(),
            buffer_size: config.limits.buffer_size,
            send_queue_size: config.queues.send_queue_size,
            receive_queue_size: config.queues.receive_queue_size,
            handshake_timeout: config.timeouts.handshake_timeout,
            send_timeout: config.timeouts.send_timeout,
            rpc_timeout: config.timeouts.rpc_timeout,
            heartbeat: config.heartbeat.clone(),
            rate_limit: config
                .rate_limit
                .enabled
                .then_some(config.rate_limit.messages_per_second),
            shutdown_reason: DisconnectReason::ServerShutdown,
        }
    }

    pub(crate) fn for_client(config: &ClientConfig, handlers: Arc<Handlers>) -> Self {
        Self {
            handlers,
            codec: ConduitCodec::with_max_message_size(config.limits.max_message_size),
            limits: ValidationLimits::default(),
            buffer_size: config.limits.buffer_size,
            send_queue_size: config.queues.send_queue_size,
            receive_queue_size: config.queues.receive_queue_size,
            handshake_timeout: config.timeouts.handshake_timeout,
            send_timeout: config.timeouts.send_timeout,
            rpc_timeout: config.timeouts.rpc_timeout,
            heartbeat: config.heartbeat.clone(),
            rate_limit: config
                .rate_limit
                .enabled
                .then_some(config.rate_limit.messages_per_second),
            shutdown_reason: DisconnectReason::LocalClose,
        }
    }
}

/// Which side of the handshake this connection plays
pub(crate) enum Role {
    /// Accepting side: verifies AUTH_REQUEST
    Server {
        authenticator: Authenticator,
        name: String,
        version: String,
    },
    /// Initiating side: sends AUTH_REQUEST
    Client {
        secret_hash: String,
        name: String,
        version: String,
    },
}

/// Reads whole frames from the transport.
///
/// `next_frame` is cancel-safe: bytes already read stay in the buffer.
struct FrameReader {
    inner: ReadHalf<BoxedStream>,
    buffer: FrameBuffer,
    chunk: Vec<u8>,
    stats: Arc<ConnectionStats>,
}

impl FrameReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>, DisconnectReason> {
        loop {
            #[cfg(feature = "metrics")]
            let (started, buffered) = (std::time::Instant::now(), self.buffer.buffered_len());

            match self.buffer.decode_one() {
                Ok(Some(frame)) => {
                    #[cfg(feature = "metrics")]
                    if let Some(m) = netconduit_observability::conduit_metrics() {
                        let consumed = buffered - self.buffer.buffered_len();
                        m.record_decode(frame.message_type.name(), consumed, started.elapsed());
                    }
                    return Ok(Some(frame));
                }
                Ok(None) => {}
                Err(e) => return Err(DisconnectReason::Protocol(e.to_string())),
            }

            let n = self
                .inner
                .read(&mut self.chunk)
                .await
                .map_err(|e| DisconnectReason::Transport(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            self.stats.record_bytes_received(n as u64);
            self.buffer.feed(&self.chunk[..n]);
        }
    }
}

/// A live connection before and during its main loop
pub(crate) struct Connection {
    handle: ConnectionHandle,
    reader: FrameReader,
    writer: JoinHandle<()>,
    ctx: ConnectionContext,
}

impl Connection {
    /// Wrap an established stream and start its writer task
    pub(crate) fn new(
        stream: BoxedStream,
        peer_addr: SocketAddr,
        ctx: ConnectionContext,
        cancel: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = kanal::bounded_async(ctx.send_queue_size);
        let stats = Arc::new(ConnectionStats::default());

        let handle = ConnectionHandle::new(
            Uuid::new_v4(),
            peer_addr,
            outbound_tx,
            Arc::clone(&stats),
            ctx.codec,
            cancel.clone(),
            ctx.send_timeout,
            ctx.rpc_timeout,
        );

        let writer = tokio::spawn({
            let handle = handle.clone();
            let stats = Arc::clone(&stats);
            async move {
                if let Err(e) = run_writer(outbound_rx, write_half, stats, cancel).await {
                    debug!(conn_id = %handle.id(), "Write failed: {}", e);
                    handle.close_with(DisconnectReason::Transport(e.to_string()));
                }
            }
        });

        let reader = FrameReader {
            inner: read_half,
            buffer: FrameBuffer::new(ctx.codec),
            chunk: vec![0u8; ctx.buffer_size.max(1024)],
            stats,
        };

        Self {
            handle,
            reader,
            writer,
            ctx,
        }
    }

    pub(crate) fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Run the authentication exchange; the connection is ACTIVE on success
    pub(crate) async fn handshake(&mut self, role: Role) -> Result<(), DisconnectReason> {
        self.handle.advance(ConnectionState::Authenticating);
        match role {
            Role::Server {
                authenticator,
                name,
                version,
            } => self.accept_handshake(authenticator, name, version).await,
            Role::Client {
                secret_hash,
                name,
                version,
            } => self.initiate_handshake(secret_hash, name, version).await,
        }
    }

    /// Read the first frame, bounded by the handshake timeout
    async fn first_frame(&mut self) -> Result<Frame, DisconnectReason> {
        let deadline = Instant::now() + self.ctx.handshake_timeout;
        let cancel = self.handle.cancel_token().clone();

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Err(self
                    .handle
                    .disconnect_reason()
                    .unwrap_or_else(|| self.ctx.shutdown_reason.clone()))
            }
            read = tokio::time::timeout_at(deadline, self.reader.next_frame()) => match read {
                Err(_) => Err(DisconnectReason::HandshakeTimeout),
                Ok(Ok(Some(frame))) => Ok(frame),
                Ok(Ok(None)) => Err(DisconnectReason::PeerClosed),
                Ok(Err(reason)) => Err(reason),
            },
        }
    }

    async fn accept_handshake(
        &mut self,
        mut authenticator: Authenticator,
        name: String,
        version: String,
    ) -> Result<(), DisconnectReason> {
        let frame = match self.first_frame().await {
            Ok(frame) => frame,
            Err(reason) => {
                if reason == DisconnectReason::HandshakeTimeout {
                    warn!(peer = %self.handle.peer_addr(), "No AUTH_REQUEST before deadline");
                    #[cfg(feature = "metrics")]
                    if let Some(m) = netconduit_observability::conduit_metrics() {
                        m.auth_failure("handshake_timeout");
                    }
                }
                return Err(reason);
            }
        };

        let limits = &self.ctx.limits;
        let verdict = authenticator.verify_first_frame(frame.message_type, || {
            validate_frame(&frame, limits).map_err(|e| e.to_string())?;
            frame.body::<AuthRequest>().map_err(|e| e.to_string())
        });

        let request = match verdict {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    conn_id = %self.handle.id(),
                    peer = %self.handle.peer_addr(),
                    reason = e.reason(),
                    "Authentication failed: {}", e
                );
                #[cfg(feature = "metrics")]
                if let Some(m) = netconduit_observability::conduit_metrics() {
                    m.auth_failure(e.reason());
                }
                if let Ok(failure) = Frame::auth_failure(e.to_string()) {
                    let _ = self.handle.send_frame(&failure).await;
                }
                return Err(DisconnectReason::AuthFailed(e.to_string()));
            }
        };

        let session_token = generate_session_token();
        let success = AuthSuccess {
            session_token: session_token.clone(),
            connection_id: self.handle.id(),
            server_name: name,
            server_version: version,
            heartbeat_interval_ms: self.ctx.heartbeat.interval.as_millis() as u64,
            metadata: HashMap::new(),
        };
        let reply =
            Frame::auth_success(&success).map_err(|e| DisconnectReason::Protocol(e.to_string()))?;
        self.handle
            .send_frame(&reply)
            .await
            .map_err(|e| DisconnectReason::Transport(e.to_string()))?;

        let client_name = (!request.client_name.is_empty()).then_some(request.client_name);
        info!(
            conn_id = %self.handle.id(),
            peer = %self.handle.peer_addr(),
            client = client_name.as_deref().unwrap_or("-"),
            "Client authenticated"
        );
        self.handle.set_session(session_token, client_name);
        self.handle.advance(ConnectionState::Active);
        Ok(())
    }

    async fn initiate_handshake(
        &mut self,
        secret_hash: String,
        name: String,
        version: String,
    ) -> Result<(), DisconnectReason> {
        let request = AuthRequest {
            secret_hash,
            client_name: name,
            client_version: version,
            metadata: HashMap::new(),
        };
        let frame =
            Frame::auth_request(&request).map_err(|e| DisconnectReason::Protocol(e.to_string()))?;
        self.handle
            .send_frame(&frame)
            .await
            .map_err(|e| DisconnectReason::Transport(e.to_string()))?;

        let reply = self.first_frame().await?;
        match reply.message_type {
            MessageType::AuthSuccess => {
                let success: AuthSuccess = reply
                    .body()
                    .map_err(|e| DisconnectReason::Protocol(e.to_string()))?;
                debug!(
                    conn_id = %self.handle.id(),
                    server_conn_id = %success.connection_id,
                    server = %success.server_name,
                    "Authenticated"
                );
                self.handle.set_session(success.session_token, None);
                self.handle.advance(ConnectionState::Active);
                Ok(())
            }
            MessageType::AuthFailure => {
                let reason = reply
                    .body::<AuthFailure>()
                    .map(|f| f.reason)
                    .unwrap_or_else(|_| "rejected".to_string());
                Err(DisconnectReason::AuthFailed(reason))
            }
            other => Err(DisconnectReason::Protocol(format!(
                "unexpected {other} during handshake"
            ))),
        }
    }

    /// Close without entering the main loop, e.g. after a failed handshake.
    /// Queued frames (AUTH_FAILURE) are still flushed.
    pub(crate) async fn abort(self, reason: DisconnectReason) -> DisconnectReason {
        self.handle.close_with(reason);
        self.teardown().await
    }

    /// Drive an ACTIVE connection until it closes.
    ///
    /// `on_active` runs on the dispatch task before the first application
    /// frame is handled. The read loop is already running by then, so the
    /// hook may itself make RPC calls on this connection.
    pub(crate) async fn run<F>(mut self, on_active: F) -> DisconnectReason
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.clone();
        let cancel = handle.cancel_token().clone();
        let limiter = self.ctx.rate_limit.and_then(MessageRateLimiter::new);
        let mut monitor = HeartbeatMonitor::new(self.ctx.heartbeat.timeout);

        let mut ping = tokio::time::interval(self.ctx.heartbeat.interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (inbound_tx, inbound_rx) = kanal::bounded_async(self.ctx.receive_queue_size);
        tokio::spawn({
            let handlers = Arc::clone(&self.ctx.handlers);
            let conn = handle.clone();
            async move {
                on_active.await;
                dispatch_loop(handlers, conn, inbound_rx).await;
            }
        });

        #[cfg(feature = "metrics")]
        if let Some(m) = netconduit_observability::conduit_metrics() {
            m.connection_opened();
        }

        let reason = loop {
            let deadline = monitor.deadline();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    break handle
                        .disconnect_reason()
                        .unwrap_or_else(|| self.ctx.shutdown_reason.clone());
                }
                () = sleep_until(deadline) => {
                    if monitor.check_expired(Instant::now()) {
                        warn!(
                            conn_id = %handle.id(),
                            peer = %handle.peer_addr(),
                            outstanding = monitor.outstanding(),
                            "Heartbeat timed out"
                        );
                        #[cfg(feature = "metrics")]
                        if let Some(m) = netconduit_observability::conduit_metrics() {
                            m.heartbeat_timeout();
                        }
                        self.ctx.handlers.heartbeat_timed_out(handle.clone()).await;
                        break DisconnectReason::HeartbeatTimeout;
                    }
                }
                _ = ping.tick() => {
                    let seq = monitor.ping_sent(Instant::now());
                    match Frame::ping(seq, unix_millis()) {
                        Ok(frame) => {
                            if let Err(e) = handle.send_frame(&frame).await {
                                debug!(conn_id = %handle.id(), "Ping not sent: {}", e);
                            }
                        }
                        Err(e) => debug!("Ping not encoded: {}", e),
                    }
                }
                read = self.reader.next_frame() => match read {
                    Ok(Some(frame)) => {
                        let admitted = handle_frame(
                            &handle,
                            &self.ctx,
                            frame,
                            &mut monitor,
                            limiter.as_ref(),
                            &inbound_tx,
                        )
                        .await;
                        if let Err(reason) = admitted {
                            break reason;
                        }
                    }
                    Ok(None) => break DisconnectReason::PeerClosed,
                    Err(reason) => break reason,
                },
            }
        };

        drop(inbound_tx);
        self.handle.close_with(reason);
        let reason = self.teardown().await;

        #[cfg(feature = "metrics")]
        if let Some(m) = netconduit_observability::conduit_metrics() {
            m.connection_closed(reason.as_str());
        }
        reason
    }

    async fn teardown(self) -> DisconnectReason {
        let handle = self.handle;
        handle.advance(ConnectionState::Closing);
        handle.pending().cancel_all();

        if let Err(e) = self.writer.await {
            debug!(conn_id = %handle.id(), "Writer task ended abnormally: {}", e);
        }

        handle.advance(ConnectionState::Closed);
        let reason = handle
            .disconnect_reason()
            .unwrap_or(DisconnectReason::LocalClose);
        info!(conn_id = %handle.id(), peer = %handle.peer_addr(), reason = %reason, "Connection closed");
        reason
    }
}

/// Route one inbound frame after the handshake.
///
/// Takes the handle and context rather than the `Connection`, which owns
/// the read half and must not be borrowed across the awaits below.
async fn handle_frame(
    handle: &ConnectionHandle,
    ctx: &ConnectionContext,
    frame: Frame,
    monitor: &mut HeartbeatMonitor,
    limiter: Option<&MessageRateLimiter>,
    inbound: &AsyncSender<Frame>,
) -> Result<(), DisconnectReason> {
    validate_frame(&frame, &ctx.limits).map_err(|e| DisconnectReason::Protocol(e.to_string()))?;
    handle.stats().record_message_received();

    match frame.message_type {
        MessageType::HeartbeatPing => {
            let pong = Frame::pong(frame.correlation_id, unix_millis())
                .map_err(|e| DisconnectReason::Protocol(e.to_string()))?;
            if let Err(e) = handle.send_frame(&pong).await {
                debug!(conn_id = %handle.id(), "Pong not sent: {}", e);
            }
            handle.stats().record_heartbeat(unix_millis());
        }
        MessageType::HeartbeatPong => {
            if let Some(rtt) = monitor.pong_received(frame.correlation_id, Instant::now()) {
                handle.stats().record_rtt(rtt);
            }
            handle.stats().record_heartbeat(unix_millis());
        }
        MessageType::RpcResponse | MessageType::RpcError => {
            handle.pending().resolve(&frame);
        }
        MessageType::Message | MessageType::RpcRequest => {
            if let Some(limiter) = limiter {
                if !limiter.admit(frame.message_type) {
                    debug!(conn_id = %handle.id(), "Rate limited, dropping {}", frame.message_type);
                    #[cfg(feature = "metrics")]
                    if let Some(m) = netconduit_observability::conduit_metrics() {
                        m.rate_limited();
                    }
                    return Ok(());
                }
            }
            if inbound.send(frame).await.is_err() {
                return Err(handle
                    .disconnect_reason()
                    .unwrap_or_else(|| ctx.shutdown_reason.clone()));
            }
        }
        auth => {
            debug!(conn_id = %handle.id(), "Ignoring {} after handshake", auth);
        }
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Feed admitted frames to the handlers in arrival order
async fn dispatch_loop(handlers: Arc<Handlers>, conn: ConnectionHandle, inbound: AsyncReceiver<Frame>) {
    while let Ok(frame) = inbound.recv().await {
        handlers.dispatch(&conn, frame).await;
    }
}
