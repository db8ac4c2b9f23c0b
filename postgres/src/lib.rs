//! `PostgreSQL` booking store for the studio booking engine.
//!
//! This crate provides a PostgreSQL-based implementation of the
//! `BookingStore` and `ScheduleAdmin` traits from `studio-booking-core`.
//! It uses sqlx and supports:
//!
//! - Connection pooling
//! - One transaction per unit of work, serialized per occurrence with a
//!   transaction-scoped advisory lock
//! - Partial unique indexes as a second line of defence against duplicate
//!   confirmed reservations and waiting entries
//! - Embedded migrations
//!
//! # Example
//!
//! ```ignore
//! use studio_booking_postgres::PostgresBookingStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresBookingStore::connect(
//!         "postgres://localhost/booking",
//!         10,
//!         1,
//!         std::time::Duration::from_secs(30),
//!     )
//!     .await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod store;
mod unit;

pub use store::PostgresBookingStore;
pub use unit::PostgresOccurrenceUnit;
