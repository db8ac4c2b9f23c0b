//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the booking engine:
//! - Reservation outcomes (confirmed, waitlisted, full)
//! - Cancellations, promotions and withdrawals
//! - Operation latency and error kinds
//! - Notification delivery failures
//! - Retry behaviour
//!
//! # Example
//!
//! ```rust,no_run
//! use studio_booking_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the Prometheus recorder and its HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            // `ExporterError` implements neither Display nor Debug.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "booking_reservations_confirmed_total",
        "Reservations confirmed, labelled by origin (direct or promoted_from_waitlist)"
    );
    describe_counter!(
        "booking_waitlist_joined_total",
        "Requests that joined a waitlist"
    );
    describe_counter!(
        "booking_full_rejections_total",
        "Requests answered with Full"
    );
    describe_counter!(
        "booking_cancellations_total",
        "Confirmed reservations cancelled"
    );
    describe_counter!(
        "booking_promotions_total",
        "Waitlist entries promoted after a cancellation"
    );
    describe_counter!(
        "booking_withdrawals_total",
        "Waitlist entries withdrawn by their requester"
    );
    describe_counter!(
        "booking_operation_errors_total",
        "Coordinator operations that returned an error, labelled by kind"
    );
    describe_histogram!(
        "booking_operation_duration_seconds",
        "Time taken by coordinator operations, including retries"
    );
    describe_counter!(
        "booking_notifications_failed_total",
        "Notifications whose delivery failed"
    );
    describe_counter!(
        "booking_store_commit_failures_total",
        "Units of work whose transaction failed to commit"
    );

    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a confirmed reservation.
    ///
    /// `origin` is the storage name of the reservation origin.
    pub fn record_confirmed(origin: &'static str) {
        counter!("booking_reservations_confirmed_total", "origin" => origin).increment(1);
    }

    /// Record a request that joined the waitlist.
    pub fn record_waitlisted() {
        counter!("booking_waitlist_joined_total").increment(1);
    }

    /// Record a request answered with Full.
    pub fn record_full() {
        counter!("booking_full_rejections_total").increment(1);
    }

    /// Record a cancellation, and the promotion it triggered if any.
    pub fn record_cancelled(promoted: bool) {
        counter!("booking_cancellations_total").increment(1);
        if promoted {
            counter!("booking_promotions_total").increment(1);
            Self::record_confirmed("promoted_from_waitlist");
        }
    }

    /// Record a waitlist withdrawal.
    pub fn record_withdrawn() {
        counter!("booking_withdrawals_total").increment(1);
    }

    /// Record an operation error by kind.
    pub fn record_error(kind: &'static str) {
        counter!("booking_operation_errors_total", "kind" => kind).increment(1);
    }

    /// Record the duration of an operation.
    pub fn record_duration(operation: &'static str, duration: Duration) {
        histogram!("booking_operation_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record a failed notification delivery.
    pub fn record_notification_failed(event_type: &'static str) {
        counter!("booking_notifications_failed_total", "event_type" => event_type).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_booking_metrics_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        BookingMetrics::record_confirmed("direct");
        BookingMetrics::record_cancelled(true);
        BookingMetrics::record_duration("request_reservation", Duration::from_millis(3));

        // If another test installed the recorder first, handle is None.
        // Metrics are still recorded globally.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("booking_reservations_confirmed_total"));
            assert!(rendered.contains("booking_promotions_total"));
        }
    }
}
