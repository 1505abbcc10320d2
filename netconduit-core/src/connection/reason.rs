use std::fmt;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` / `disconnect()` on this side
    LocalClose,
    /// Orderly EOF from the peer
    PeerClosed,
    HeartbeatTimeout,
    /// Framing or payload violation
    Protocol(String),
    AuthFailed(String),
    HandshakeTimeout,
    /// I/O or TLS failure
    Transport(String),
    /// Send queue stayed full past the send timeout
    Unresponsive,
    ServerShutdown,
    /// Client gave up reconnecting
    ReconnectExhausted,
}

impl DisconnectReason {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::LocalClose => "local_close",
            DisconnectReason::PeerClosed => "peer_closed",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::Protocol(_) => "protocol_error",
            DisconnectReason::AuthFailed(_) => "auth_failed",
            DisconnectReason::HandshakeTimeout => "handshake_timeout",
            DisconnectReason::Transport(_) => "transport_error",
            DisconnectReason::Unresponsive => "unresponsive",
            DisconnectReason::ServerShutdown => "server_shutdown",
            DisconnectReason::ReconnectExhausted => "reconnect_exhausted",
        }
    }

    /// Whether a client should try to reconnect after this
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            DisconnectReason::PeerClosed
                | DisconnectReason::HeartbeatTimeout
                | DisconnectReason::Protocol(_)
                | DisconnectReason::Transport(_)
                | DisconnectReason::Unresponsive
                | DisconnectReason::ServerShutdown
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Protocol(detail)
            | DisconnectReason::AuthFailed(detail)
            | DisconnectReason::Transport(detail) => write!(f, "{}: {}", self.as_str(), detail),
            _ => f.write_str(self.as_str()),
        }
    }
}
