use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Initialization options for tracing
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Emit newline-delimited JSON instead of human-readable lines
    pub json: bool,
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: false,
            thread_ids: true,
        }
    }
}

/// Initialize the global tracing subscriber
pub fn init_tracing(config: TracingConfig) -> Result<(), anyhow::Error> {
    // "debug" adds overhead in hot paths; use RUST_LOG=debug when needed
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))?;

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_thread_ids(config.thread_ids)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(config.thread_ids)
            .with_target(true)
            .boxed()
    };

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Tracing infrastructure initialized");
    Ok(())
}
