//! Capacity Tracker.
//!
//! Derives, for one occurrence, how many confirmed reservations exist
//! against the slot's configured ceiling. Two entry points:
//!
//! - [`CapacityTracker::inspect`] uses plain reads and may be stale by the
//!   time the caller acts on it.
//! - [`CapacityTracker::inspect_within`] reads through an open
//!   [`OccurrenceUnit`], so a subsequent write in the same unit is decided on
//!   exactly the state it commits against.

use serde::{Deserialize, Serialize};
use studio_booking_core::error::Result;
use studio_booking_core::store::{BookingStore, OccurrenceUnit};
use studio_booking_core::{BookingError, Occurrence, SlotCapacity};

/// Point-in-time capacity view of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Configured ceiling
    pub maximum: u32,
    /// Confirmed reservations
    pub confirmed_count: u32,
    /// `max(0, maximum - confirmed_count)`
    pub available_spots: u32,
    /// Waiting entries
    pub waitlist_count: u32,
    /// `available_spots == 0`
    pub is_full: bool,
    /// Whether requests may join the waitlist when full
    pub waitlist_allowed: bool,
}

impl CapacitySnapshot {
    /// Build a snapshot from a capacity record and the current counts.
    #[must_use]
    pub const fn compute(capacity: &SlotCapacity, confirmed: u32, waiting: u32) -> Self {
        let available_spots = capacity.maximum.saturating_sub(confirmed);
        Self {
            maximum: capacity.maximum,
            confirmed_count: confirmed,
            available_spots,
            waitlist_count: waiting,
            is_full: available_spots == 0,
            waitlist_allowed: capacity.waitlist_allowed,
        }
    }
}

/// Computes [`CapacitySnapshot`]s.
#[derive(Debug, Clone)]
pub struct CapacityTracker<S> {
    store: S,
}

impl<S: BookingStore> CapacityTracker<S> {
    /// Create a tracker over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Snapshot an occurrence using plain reads.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the slot has no capacity record
    /// - [`BookingError::StorageTransient`] if the store cannot be read
    pub async fn inspect(&self, occurrence: Occurrence) -> Result<CapacitySnapshot> {
        let capacity = self
            .store
            .find_capacity(occurrence.slot_id)
            .await?
            .ok_or(BookingError::NotFound)?;
        let confirmed = self.store.count_confirmed(occurrence).await?;
        let waiting = self.store.count_waiting(occurrence).await?;
        Ok(CapacitySnapshot::compute(&capacity, confirmed, waiting))
    }

    /// Snapshot the unit's occurrence, reading through the unit.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the slot has no capacity record
    /// - [`BookingError::StorageTransient`] if a read fails
    pub async fn inspect_within<U: OccurrenceUnit>(&self, unit: &mut U) -> Result<CapacitySnapshot> {
        let capacity = unit.capacity().await?.ok_or(BookingError::NotFound)?;
        let confirmed = unit.count_confirmed().await?;
        let waiting = unit.count_waiting().await?;
        Ok(CapacitySnapshot::compute(&capacity, confirmed, waiting))
    }
}
