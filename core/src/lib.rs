//! # Studio Booking Core
//!
//! Core types and collaborator traits for the class reservation engine.
//!
//! The engine decides whether a reservation request for one occurrence of a
//! recurring class slot (slot + date) can be confirmed, keeps a FIFO waitlist
//! once the occurrence is full, and promotes the oldest waiting requester when
//! a confirmed reservation is cancelled.
//!
//! ## Core Concepts
//!
//! - **Slot**: a recurring class time-block at a venue
//! - **Occurrence**: one dated instance of a slot, the unit capacity applies to
//! - **Reservation**: a requester's confirmed or cancelled claim on an occurrence
//! - **Waitlist entry**: a pending request against a full occurrence
//! - **Principal**: the identity and privilege of the caller, passed explicitly
//!
//! ## Collaborators
//!
//! All external dependencies are abstracted behind traits and injected:
//!
//! - [`store::BookingStore`]: durable store with per-occurrence units of work
//! - [`store::ScheduleAdmin`]: administrative writes to the schedule
//! - [`notify::Notifier`]: notification delivery
//! - [`environment::Clock`]: time
//!
//! ## Example
//!
//! ```
//! use studio_booking_core::types::{Occurrence, SlotId};
//! use chrono::NaiveDate;
//!
//! let occurrence = Occurrence::new(SlotId::new(), NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
//! assert_eq!(occurrence.date.to_string(), "2025-03-03");
//! ```

pub mod error;
pub mod notify;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
pub use error::{BookingError, NotifyError, StoreError};
pub use types::{
    Occurrence, Principal, Privilege, RequesterId, Reservation, ReservationId, ReservationOrigin,
    ReservationStatus, Slot, SlotCapacity, SlotId, VenueId, WaitlistEntry, WaitlistEntryId,
    WaitlistStatus,
};

/// Environment module - Dependency injection traits
///
/// All time-dependent behaviour goes through [`Clock`](environment::Clock) so
/// that tests can pin or step time deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
