//! Logging initialization for the exporter.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Log level comes from `RUST_LOG` when set, otherwise from the provided
/// default. Safe to call more than once; later calls are no-ops.
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Exporter started");
/// ```
pub fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
