//! # Studio Booking Testing
//!
//! Testing utilities for the studio booking engine.
//!
//! This crate provides:
//! - [`InMemoryBookingStore`]: a store with the same unit-of-work semantics as
//!   the Postgres store, plus fault injection
//! - Mock implementations of the environment (clocks) and of the notifier
//! - Fixtures for seeding slots
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use studio_booking_testing::{helpers, AdvancingClock, InMemoryBookingStore, RecordingNotifier};
//!
//! #[tokio::test]
//! async fn last_spot_goes_to_first_caller() {
//!     let store = InMemoryBookingStore::new();
//!     let slot = helpers::seed_slot(&store, 1, true).await.unwrap();
//!     let coordinator = Coordinator::new(store.clone(), AdvancingClock::default());
//!     // ...
//! }
//! ```

pub mod memory_store;

pub use memory_store::{InMemoryBookingStore, InMemoryUnit};

/// Mock implementations for testing.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::{Arc, Mutex};
    use studio_booking_core::environment::Clock;
    use studio_booking_core::notify::{NotificationEvent, Notifier};
    use studio_booking_core::{NotifyError, RequesterId};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use studio_booking_testing::mocks::FixedClock;
    /// use studio_booking_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that moves forward by a fixed step on every reading.
    ///
    /// Gives each created record a distinct, increasing timestamp, so FIFO
    /// order in tests is the order of the calls.
    ///
    /// ```
    /// use studio_booking_testing::mocks::AdvancingClock;
    /// use studio_booking_core::environment::Clock;
    ///
    /// let clock = AdvancingClock::default();
    /// assert!(clock.now() < clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct AdvancingClock {
        start: DateTime<Utc>,
        step: Duration,
        ticks: Arc<AtomicI32>,
    }

    impl AdvancingClock {
        /// Start at `start`, advancing by `step` per reading.
        #[must_use]
        pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
            Self {
                start,
                step,
                ticks: Arc::new(AtomicI32::new(0)),
            }
        }
    }

    impl Default for AdvancingClock {
        /// Starts at the [`test_clock`] instant, one second per reading.
        fn default() -> Self {
            Self::new(test_clock().now(), Duration::seconds(1))
        }
    }

    impl Clock for AdvancingClock {
        fn now(&self) -> DateTime<Utc> {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
            self.start + self.step * tick
        }
    }

    /// Notifier that records every delivery attempt.
    ///
    /// Can be switched into a failing mode to check that delivery failures
    /// never affect reservation state.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingNotifier {
        received: Arc<Mutex<Vec<(RequesterId, NotificationEvent)>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingNotifier {
        /// Create a notifier that accepts every delivery.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a notifier that rejects every delivery.
        #[must_use]
        pub fn failing() -> Self {
            let notifier = Self::default();
            notifier.set_failing(true);
            notifier
        }

        /// Switch the failing mode.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Every delivery attempt so far, in call order.
        #[must_use]
        pub fn received(&self) -> Vec<(RequesterId, NotificationEvent)> {
            self.received
                .lock()
                .map(|received| received.clone())
                .unwrap_or_default()
        }

        /// Wait until at least `count` deliveries were attempted.
        ///
        /// Deliveries are dispatched in background tasks. Gives up after two
        /// seconds and returns whatever was received.
        pub async fn wait_for(&self, count: usize) -> Vec<(RequesterId, NotificationEvent)> {
            for _ in 0..200 {
                let received = self.received();
                if received.len() >= count {
                    return received;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            self.received()
        }
    }

    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            requester_id: RequesterId,
            event: NotificationEvent,
        ) -> Result<(), NotifyError> {
            self.received
                .lock()
                .map_err(|_| NotifyError::Delivery("recorder lock poisoned".to_string()))?
                .push((requester_id, event));

            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Delivery("simulated outage".to_string()));
            }
            Ok(())
        }
    }
}

/// Test helpers and fixtures.
pub mod helpers {
    use chrono::{NaiveDate, NaiveTime, Weekday};
    use studio_booking_core::store::ScheduleAdmin;
    use studio_booking_core::{Occurrence, Slot, SlotCapacity, StoreError, VenueId};

    /// Install a test-friendly tracing subscriber.
    ///
    /// Honours `RUST_LOG`. Safe to call from every test; only the first call
    /// installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// The Monday every fixture slot is booked for (2025-03-03).
    #[must_use]
    pub fn class_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap_or_default()
    }

    /// A Monday 18:00-19:00 reformer slot at a fresh venue.
    #[must_use]
    pub fn monday_evening_slot() -> Slot {
        Slot::new(
            VenueId::new(),
            Weekday::Mon,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default(),
            "reformer",
        )
    }

    /// Insert a fixture slot with the given capacity configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the admin writes fail.
    pub async fn seed_slot<A: ScheduleAdmin>(
        admin: &A,
        maximum: u32,
        waitlist_allowed: bool,
    ) -> Result<Slot, StoreError> {
        let slot = monday_evening_slot();
        admin.upsert_slot(&slot).await?;
        admin
            .set_capacity(SlotCapacity::new(slot.id, maximum, waitlist_allowed))
            .await?;
        Ok(slot)
    }

    /// The fixture occurrence of `slot` on [`class_date`].
    #[must_use]
    pub fn occurrence_of(slot: &Slot) -> Occurrence {
        slot.next_occurrence(class_date())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One step of a randomized booking workload.
    ///
    /// Requesters are referred to by index into a pool the test owns.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum BookingOp {
        /// Request a reservation
        Request {
            /// Requester index
            requester: usize,
            /// Join the waitlist when full
            join_waitlist: bool,
        },
        /// Cancel the requester's confirmed reservation, if any
        Cancel {
            /// Requester index
            requester: usize,
        },
        /// Withdraw the requester's waiting entry, if any
        Withdraw {
            /// Requester index
            requester: usize,
        },
    }

    /// A single operation over a pool of `requesters` requesters.
    pub fn booking_op(requesters: usize) -> impl Strategy<Value = BookingOp> {
        let pool = 0..requesters.max(1);
        prop_oneof![
            3 => (pool.clone(), any::<bool>()).prop_map(|(requester, join_waitlist)| {
                BookingOp::Request { requester, join_waitlist }
            }),
            2 => pool.clone().prop_map(|requester| BookingOp::Cancel { requester }),
            1 => pool.prop_map(|requester| BookingOp::Withdraw { requester }),
        ]
    }

    /// A workload of up to `max_len` operations.
    pub fn booking_ops(requesters: usize, max_len: usize) -> impl Strategy<Value = Vec<BookingOp>> {
        prop::collection::vec(booking_op(requesters), 1..=max_len.max(1))
    }

    /// A capacity configuration: `(maximum, waitlist_allowed)`.
    pub fn capacity_config() -> impl Strategy<Value = (u32, bool)> {
        (0u32..=4, any::<bool>())
    }
}

// Re-export commonly used items
pub use mocks::{AdvancingClock, FixedClock, RecordingNotifier, test_clock};
