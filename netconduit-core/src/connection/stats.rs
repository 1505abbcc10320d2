use super::state::ConnectionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Traffic counters shared by a connection's tasks
#[derive(Debug, Default)]
pub struct ConnectionStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    /// Smoothed RTT in microseconds, 0 until measured
    rtt_micros: AtomicU64,
    /// Unix millis of the last heartbeat frame received, 0 if none
    last_heartbeat_ms: AtomicU64,
}

impl ConnectionStats {
    pub fn record_sent(&self, frames: u64, bytes: u64) {
        self.messages_sent.fetch_add(frames, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rtt(&self, rtt: Duration) {
        let micros = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX).max(1);
        self.rtt_micros.store(micros, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self, unix_ms: u64) {
        self.last_heartbeat_ms.store(unix_ms, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, state: ConnectionState) -> ConnectionHealth {
        let rtt = self.rtt_micros.load(Ordering::Relaxed);
        let last_hb = self.last_heartbeat_ms.load(Ordering::Relaxed);
        ConnectionHealth {
            state,
            rtt: (rtt > 0).then(|| Duration::from_micros(rtt)),
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_heartbeat: (last_hb > 0).then(|| UNIX_EPOCH + Duration::from_millis(last_hb)),
        }
    }
}

/// Point-in-time health of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    pub rtt: Option<Duration>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_heartbeat: Option<SystemTime>,
}
