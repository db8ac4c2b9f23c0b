//! # Studio Booking Runtime
//!
//! Operational plumbing shared by the booking service and its stores:
//!
//! - [`retry`]: exponential backoff for operations that fail with a
//!   retryable (transient) error
//! - [`metrics`]: Prometheus exporter and typed metric recorders
//!
//! Nothing here knows about reservations; the booking crate decides what is
//! retryable and what to record.

pub mod metrics;
pub mod retry;

pub use retry::{RetryPolicy, retry_with_predicate};
