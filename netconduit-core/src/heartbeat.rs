//! Heartbeat bookkeeping: outstanding pings, liveness deadline, RTT estimate
//!
//! Pure state; the connection driver owns the timers and feeds events in.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Upper bound on remembered unanswered pings
const MAX_OUTSTANDING: usize = 64;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    next_seq: u64,
    /// Unanswered pings, oldest first
    outstanding: VecDeque<(u64, Instant)>,
    rtt: Option<Duration>,
    timed_out: bool,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_seq: 1,
            outstanding: VecDeque::new(),
            rtt: None,
            timed_out: false,
        }
    }

    /// Record an outgoing ping and return its sequence number
    pub fn ping_sent(&mut self, now: Instant) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        if self.outstanding.len() == MAX_OUTSTANDING {
            // keep the oldest entry, it defines the deadline
            self.outstanding.remove(1);
        }
        self.outstanding.push_back((seq, now));
        seq
    }

    /// Record a pong. Returns the round trip for a known sequence number;
    /// unknown or stale pongs are ignored.
    pub fn pong_received(&mut self, seq: u64, now: Instant) -> Option<Duration> {
        let pos = self.outstanding.iter().position(|(s, _)| *s == seq)?;
        let (_, sent_at) = self.outstanding[pos];
        // a pong also answers every earlier ping
        self.outstanding.drain(..=pos);

        let sample = now.saturating_duration_since(sent_at);
        self.rtt = Some(match self.rtt {
            None => sample,
            Some(prev) => (prev * 7 + sample) / 8,
        });
        Some(sample)
    }

    /// When the connection is declared dead if no pong arrives
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.outstanding.front().map(|(_, sent)| *sent + self.timeout)
    }

    /// Check the deadline. Reports expiry exactly once.
    pub fn check_expired(&mut self, now: Instant) -> bool {
        if self.timed_out {
            return false;
        }
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.timed_out = true;
                true
            }
            _ => false,
        }
    }

    /// Smoothed round-trip estimate
    #[must_use]
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

/// Wall-clock milliseconds carried in heartbeat payloads
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
