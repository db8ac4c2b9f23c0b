//! Durable store abstraction for the reservation engine.
//!
//! The store is the only shared mutable resource of the engine. It exposes
//! two kinds of access:
//!
//! - **Plain reads** on [`BookingStore`], used for lookups and for the
//!   capacity snapshot. They run at whatever consistency the backend offers
//!   for single reads.
//! - **Units of work** ([`OccurrenceUnit`]), opened with
//!   [`BookingStore::begin`] for exactly one occurrence (slot + date). A unit
//!   is exclusive: two units on the same occurrence never overlap, so a
//!   count-then-insert or cancel-then-promote sequence executed through one
//!   unit is atomic with respect to every other caller. Writes made through a
//!   unit become visible only on [`OccurrenceUnit::commit`]; dropping the unit
//!   rolls them back.
//!
//! # Implementations
//!
//! - `PostgresBookingStore` (in `studio-booking-postgres`): one transaction
//!   per unit, serialized with an advisory lock on the occurrence
//! - `InMemoryBookingStore` (in `studio-booking-testing`): fast,
//!   deterministic tests with the same unit semantics
//!
//! # Example
//!
//! ```ignore
//! async fn cancel_first<S: BookingStore>(store: &S, occurrence: Occurrence) -> Result<(), StoreError> {
//!     let mut unit = store.begin(occurrence).await?;
//!     if let Some(entry) = unit.oldest_waiting().await? {
//!         // ... write through the unit ...
//!     }
//!     unit.commit().await
//! }
//! ```

use crate::error::StoreError;
use crate::types::{
    Occurrence, RequesterId, Reservation, ReservationId, ReservationStatus, Slot, SlotCapacity,
    SlotId, WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};
use std::future::Future;

/// Read surface of the durable store plus the unit-of-work factory.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the coordinator is shared across
/// concurrent requests.
pub trait BookingStore: Send + Sync {
    /// Unit of work type returned by [`begin`](Self::begin).
    type Unit: OccurrenceUnit;

    /// Look up a slot (active or not).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn find_slot(
        &self,
        slot_id: SlotId,
    ) -> impl Future<Output = Result<Option<Slot>, StoreError>> + Send;

    /// All slots known to the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn list_slots(&self) -> impl Future<Output = Result<Vec<Slot>, StoreError>> + Send;

    /// Capacity configuration of a slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn find_capacity(
        &self,
        slot_id: SlotId,
    ) -> impl Future<Output = Result<Option<SlotCapacity>, StoreError>> + Send;

    /// Look up a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn find_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>, StoreError>> + Send;

    /// Look up a waitlist entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn find_waitlist_entry(
        &self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send;

    /// Number of confirmed reservations for an occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn count_confirmed(
        &self,
        occurrence: Occurrence,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// Number of waiting entries for an occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn count_waiting(
        &self,
        occurrence: Occurrence,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// A requester's waiting entries across all occurrences, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn waiting_entries_for(
        &self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Vec<WaitlistEntry>, StoreError>> + Send;

    /// 1-based FIFO rank of a waiting entry within its occurrence.
    ///
    /// Returns `None` when the entry does not exist or is no longer waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn waitlist_position(
        &self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send;

    /// A requester's reservations in any status, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn reservations_for(
        &self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Vec<Reservation>, StoreError>> + Send;

    /// Open an exclusive unit of work on one occurrence.
    ///
    /// Waits until no other unit on the same occurrence is open.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot start a unit.
    fn begin(
        &self,
        occurrence: Occurrence,
    ) -> impl Future<Output = Result<Self::Unit, StoreError>> + Send;
}

/// An exclusive, all-or-nothing unit of work scoped to one occurrence.
///
/// Every read sees the writes already made through the same unit. Nothing is
/// visible to other callers until [`commit`](Self::commit) succeeds; dropping
/// the unit without committing discards every write.
pub trait OccurrenceUnit: Send {
    /// The occurrence this unit is scoped to.
    fn occurrence(&self) -> Occurrence;

    /// Capacity configuration of the occurrence's slot, read under the unit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn capacity(&mut self) -> impl Future<Output = Result<Option<SlotCapacity>, StoreError>> + Send;

    /// Number of confirmed reservations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn count_confirmed(&mut self) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// Number of waiting entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn count_waiting(&mut self) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// A reservation of this occurrence by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>, StoreError>> + Send;

    /// The requester's confirmed reservation for this occurrence, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn confirmed_for(
        &mut self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Option<Reservation>, StoreError>> + Send;

    /// The requester's waiting entry for this occurrence, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn waiting_for(
        &mut self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send;

    /// A waitlist entry of this occurrence by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn waitlist_entry(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send;

    /// Stage a new reservation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if a uniqueness rule is violated.
    fn insert_reservation(
        &mut self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stage a reservation status change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the reservation does not belong to this
    /// occurrence or the write fails.
    fn update_reservation_status(
        &mut self,
        reservation_id: ReservationId,
        status: &ReservationStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stage a new waitlist entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if a uniqueness rule is violated.
    fn insert_waitlist_entry(
        &mut self,
        entry: &WaitlistEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stage a waitlist status change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the entry does not belong to this occurrence
    /// or the write fails.
    fn update_waitlist_status(
        &mut self,
        entry_id: WaitlistEntryId,
        status: &WaitlistStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Head of the FIFO queue: the waiting entry with the smallest
    /// `(created_at, id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn oldest_waiting(
        &mut self,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send;

    /// 1-based FIFO rank of a waiting entry, `None` if it is not waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn waitlist_position(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send;

    /// Make every staged write visible at once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the commit fails; in that case
    /// none of the staged writes are applied.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Administrative write surface for the schedule.
///
/// The reservation engine only reads the schedule; slots and capacities are
/// maintained by an administrative collaborator through this trait.
pub trait ScheduleAdmin: Send + Sync {
    /// Insert or replace a slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn upsert_slot(&self, slot: &Slot) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert or replace the capacity record of a slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails (including an unknown slot).
    fn set_capacity(
        &self,
        capacity: SlotCapacity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Toggle the active flag. Returns `false` if the slot does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn set_slot_active(
        &self,
        slot_id: SlotId,
        active: bool,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
