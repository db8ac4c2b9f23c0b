//! # Studio Booking
//!
//! Capacity-limited class reservations with FIFO waitlist promotion.
//!
//! A request for one occurrence of a recurring class slot is confirmed while
//! spots remain. Once the occurrence is full the requester may join a
//! waitlist, and when a confirmed reservation is cancelled the oldest waiting
//! entry is promoted into the freed spot in the same unit of work.
//!
//! ## Layers
//!
//! - [`registry`]: which slots exist and are bookable
//! - [`capacity`]: confirmed count against the configured ceiling
//! - [`coordinator`]: the four booking operations, each atomic per occurrence
//! - [`service`]: retry, metrics and notification dispatch around the
//!   coordinator
//! - [`config`], [`telemetry`], [`app`]: configuration and wiring
//!
//! ## Example
//!
//! ```
//! use studio_booking::coordinator::{Coordinator, RequestOutcome};
//! use studio_booking_core::{Principal, RequesterId};
//! use studio_booking_testing::{InMemoryBookingStore, test_clock, helpers};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # tokio_test::block_on(async {
//! let store = InMemoryBookingStore::new();
//! let slot = helpers::seed_slot(&store, 1, true).await?;
//! let coordinator = Coordinator::new(store, test_clock());
//!
//! let member = Principal::member(RequesterId::new());
//! let outcome = coordinator
//!     .request_reservation(&member, slot.id, helpers::class_date(), false)
//!     .await?;
//! assert!(matches!(outcome, RequestOutcome::Confirmed { .. }));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # })
//! # }
//! ```

pub mod app;
pub mod capacity;
pub mod config;
pub mod coordinator;
pub mod registry;
pub mod service;
pub mod telemetry;

pub use app::{
    AppError, DemoReport, build_service, connect_postgres, run_demo, start_observability,
};
pub use capacity::{CapacitySnapshot, CapacityTracker};
pub use config::{BookingConfig, ConfigError, StoreKind};
pub use coordinator::{
    CancelOutcome, Coordinator, Promotion, RequestOutcome, WaitlistPosition, WaitlistStream,
};
pub use registry::ScheduleRegistry;
pub use service::{BookingService, BookingSettings};
