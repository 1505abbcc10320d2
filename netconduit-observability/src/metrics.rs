//! Prometheus metrics for connections, frames, auth, heartbeats and RPC.
//!
//! Recording goes through the `metrics` facade; nothing is collected until
//! [`init_metrics`] installs the Prometheus recorder.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use netconduit_common::{ConduitError, Result};
use std::sync::OnceLock;
use std::time::Duration;

/// Active connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "netconduit_connections_active";
/// Connections accepted or established (counter).
pub const CONNECTIONS_TOTAL: &str = "netconduit_connections_total";
/// Connections closed (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "netconduit_disconnections_total";
/// Frames received (counter, labels: type).
pub const FRAMES_RECEIVED_TOTAL: &str = "netconduit_frames_received_total";
/// Frames sent (counter).
pub const FRAMES_SENT_TOTAL: &str = "netconduit_frames_sent_total";
/// Bytes received (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "netconduit_bytes_received_total";
/// Bytes sent (counter).
pub const BYTES_SENT_TOTAL: &str = "netconduit_bytes_sent_total";
/// Inbound messages dropped by the rate limiter (counter).
pub const RATE_LIMITED_TOTAL: &str = "netconduit_rate_limited_total";
/// Heartbeat timeouts (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "netconduit_heartbeat_timeouts_total";
/// Failed handshakes (counter, labels: reason).
pub const AUTH_FAILURES_TOTAL: &str = "netconduit_auth_failures_total";
/// RPC calls that hit their deadline (counter).
pub const RPC_TIMEOUTS_TOTAL: &str = "netconduit_rpc_timeouts_total";
/// RPC requests served (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "netconduit_rpc_requests_total";
/// Time spent decoding one frame (histogram, seconds).
pub const DECODE_DURATION_SECONDS: &str = "netconduit_decode_duration_seconds";

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS: ConduitMetrics = ConduitMetrics { _private: () };

/// Initialize the Prometheus exporter and return the handle.
/// This handle is used to retrieve the current metrics state as a string.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ConduitError::Config(e.to_string()))
}

/// Install the global recorder once; later calls are no-ops.
pub fn init_metrics() -> Result<()> {
    if HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = setup_metrics_recorder()?;
    let _ = HANDLE.set(handle);
    tracing::info!("prometheus metrics recorder installed");
    Ok(())
}

pub fn metrics_enabled() -> bool {
    HANDLE.get().is_some()
}

/// Recorder facade, `None` until [`init_metrics`] succeeded
pub fn conduit_metrics() -> Option<&'static ConduitMetrics> {
    metrics_enabled().then_some(&METRICS)
}

/// Render the Prometheus text exposition format
pub fn gather_metrics() -> Option<String> {
    HANDLE.get().map(|handle| {
        handle.run_upkeep();
        handle.render()
    })
}

/// Typed recording helpers used by the connection machinery
#[derive(Debug)]
pub struct ConduitMetrics {
    _private: (),
}

impl ConduitMetrics {
    pub fn connection_opened(&self) {
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    }

    pub fn connection_closed(&self, reason: &'static str) {
        counter!(DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    }

    pub fn record_decode(&self, message_type: &'static str, bytes: usize, elapsed: Duration) {
        counter!(FRAMES_RECEIVED_TOTAL, "type" => message_type).increment(1);
        counter!(BYTES_RECEIVED_TOTAL).increment(bytes as u64);
        histogram!(DECODE_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }

    pub fn record_send(&self, frames: usize, bytes: usize) {
        counter!(FRAMES_SENT_TOTAL).increment(frames as u64);
        counter!(BYTES_SENT_TOTAL).increment(bytes as u64);
    }

    pub fn rate_limited(&self) {
        counter!(RATE_LIMITED_TOTAL).increment(1);
    }

    pub fn heartbeat_timeout(&self) {
        counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
    }

    pub fn auth_failure(&self, reason: &'static str) {
        counter!(AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
    }

    pub fn rpc_timeout(&self) {
        counter!(RPC_TIMEOUTS_TOTAL).increment(1);
    }

    pub fn rpc_request(&self, method: &str) {
        counter!(RPC_REQUESTS_TOTAL, "method" => method.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        // Build a recorder + handle without installing it globally
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        let names = [
            CONNECTIONS_ACTIVE,
            CONNECTIONS_TOTAL,
            DISCONNECTIONS_TOTAL,
            FRAMES_RECEIVED_TOTAL,
            FRAMES_SENT_TOTAL,
            BYTES_RECEIVED_TOTAL,
            BYTES_SENT_TOTAL,
            RATE_LIMITED_TOTAL,
            HEARTBEAT_TIMEOUTS_TOTAL,
            AUTH_FAILURES_TOTAL,
            RPC_TIMEOUTS_TOTAL,
            RPC_REQUESTS_TOTAL,
            DECODE_DURATION_SECONDS,
        ];
        for name in names {
            assert!(name.starts_with("netconduit_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }

    #[test]
    fn init_then_gather() {
        init_metrics().unwrap();
        assert!(metrics_enabled());
        conduit_metrics().unwrap().connection_opened();
        let text = gather_metrics().unwrap();
        assert!(text.contains(CONNECTIONS_TOTAL));
    }
}
