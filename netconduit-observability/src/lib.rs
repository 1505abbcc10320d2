pub mod metrics;
pub mod tracing;

pub use metrics::{
    conduit_metrics, gather_metrics, init_metrics, metrics_enabled, setup_metrics_recorder,
    ConduitMetrics,
};
pub use tracing::{init_tracing, TracingConfig};

/// Basic initialization for minimal overhead
pub fn init_basic_observability(enable_metrics: bool) {
    if enable_metrics {
        if let Err(e) = init_metrics() {
            ::tracing::warn!("Metrics recorder not installed: {}", e);
        }
    }
    init_minimal_logging();
}

/// Minimal logging setup without a metrics recorder
/// Use this for latency-sensitive deployments where observability overhead matters
pub fn init_minimal_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
