//! Error types for the reservation engine.
//!
//! Two layers:
//!
//! - [`StoreError`]: what a durable store implementation reports. Its messages
//!   may carry backend detail and are only ever logged.
//! - [`BookingError`]: the taxonomy surfaced to callers of the coordinator.
//!   Every store failure collapses into [`BookingError::StorageTransient`].

use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Errors reported by a durable store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store unreachable, connection lost, or the unit of work could not commit.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness or serialization conflict aborted the unit of work.
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// Persisted data could not be mapped back into the domain model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the reservation coordinator.
///
/// `Full` is deliberately absent: a full occurrence is a decision point for
/// the caller and is reported through the request outcome instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingError {
    /// Referenced slot, reservation or waitlist entry does not exist, or the
    /// slot is inactive.
    #[error("Not found")]
    NotFound,

    /// Requester already holds a confirmed reservation for the occurrence.
    #[error("Requester already holds a confirmed reservation for this class")]
    DuplicateReservation,

    /// Requester already holds a waiting entry for the occurrence.
    #[error("Requester is already on the waitlist for this class")]
    DuplicateWaitlistEntry,

    /// Caller is neither the owner nor privileged.
    #[error("Forbidden")]
    Forbidden,

    /// Reservation was already cancelled; nothing was changed.
    #[error("Reservation is already cancelled")]
    AlreadyCancelled,

    /// The store was unavailable or the atomic unit could not commit.
    ///
    /// Nothing was partially applied; the whole operation may be retried.
    #[error("Storage temporarily unavailable, please retry")]
    StorageTransient,
}

impl BookingError {
    /// Whether re-running the whole operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageTransient)
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::DuplicateReservation => "duplicate_reservation",
            Self::DuplicateWaitlistEntry => "duplicate_waitlist_entry",
            Self::Forbidden => "forbidden",
            Self::AlreadyCancelled => "already_cancelled",
            Self::StorageTransient => "storage_transient",
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        tracing::warn!(error = %error, "Store operation failed");
        Self::StorageTransient
    }
}

/// Errors reported by the notification collaborator.
///
/// Never propagated into reservation state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Delivery failed.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_collapse_into_storage_transient() {
        let error: BookingError =
            StoreError::Unavailable("connection refused on 10.0.0.3:5432".to_string()).into();
        assert_eq!(error, BookingError::StorageTransient);
        assert!(error.is_retryable());
        assert!(!error.to_string().contains("5432"));
    }

    #[test]
    fn validation_errors_are_terminal() {
        for error in [
            BookingError::NotFound,
            BookingError::DuplicateReservation,
            BookingError::DuplicateWaitlistEntry,
            BookingError::Forbidden,
            BookingError::AlreadyCancelled,
        ] {
            assert!(!error.is_retryable(), "{} should not be retryable", error.kind());
        }
    }
}
