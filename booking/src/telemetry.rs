//! Logging and metrics setup for the demo binary and embedding services.

use crate::config::BookingConfig;
use studio_booking_runtime::metrics::{MetricsError, MetricsServer};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins; otherwise the configured log level is used.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &BookingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
}

/// Start the Prometheus exporter on the configured address.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built.
pub fn start_metrics(addr: std::net::SocketAddr) -> Result<MetricsServer, MetricsError> {
    let mut server = MetricsServer::new(addr);
    server.start()?;
    Ok(server)
}
